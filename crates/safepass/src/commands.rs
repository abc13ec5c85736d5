// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command handlers for the `safepass` binary.

use std::sync::Arc;

use safepass_config::SafepassConfig;
use safepass_core::{SafepassError, UserId};
use safepass_storage::SqliteDocumentStore;
use safepass_vault::{
    get_master_password, get_new_master_password, read_secret, AppSecret, Credential,
    CredentialInput, Note, NoteInput, Session, Vault, VaultItem,
};
use secrecy::ExposeSecret;
use tracing::info;

use crate::{Cli, Commands};

/// Open storage and the vault, run one command, and close storage.
pub(crate) async fn run(cli: Cli, config: SafepassConfig) -> Result<(), SafepassError> {
    let secret = AppSecret::from_env()?;
    let store = SqliteDocumentStore::open(&config.storage).await?;
    let vault = Vault::new(Arc::new(store.clone()), secret, &config);
    let user = UserId(cli.user);

    let result = dispatch(&vault, user, cli.command).await;
    store.close().await?;
    result
}

async fn dispatch(vault: &Vault, user: UserId, command: Commands) -> Result<(), SafepassError> {
    if let Commands::Init = command {
        let password = get_master_password()?;
        let session = vault.login(user, Some(&password)).await?;
        println!("vault unlocked for {}", session.user_id());
        vault.logout(session);
        return Ok(());
    }

    let session = vault.login(user, None).await?;
    let result = execute(vault, &session, command).await;
    vault.logout(session);
    result
}

async fn execute(vault: &Vault, session: &Session, command: Commands) -> Result<(), SafepassError> {
    let items = vault.items(session);
    match command {
        Commands::Init => Ok(()),
        Commands::AddCredential {
            title,
            username,
            url,
            website,
            category,
            with_notes,
        } => {
            let password = read_secret("Credential password")?;
            let notes = if with_notes {
                Some(read_secret("Notes")?)
            } else {
                None
            };
            let credential = items
                .add_credential(&CredentialInput {
                    title,
                    username,
                    password,
                    url,
                    website,
                    category,
                    notes,
                })
                .await?;
            println!("{}", credential.id);
            Ok(())
        }
        Commands::AddNote { title, category } => {
            let content = read_secret("Note content")?;
            let note = items
                .add_note(&NoteInput {
                    title,
                    content,
                    category,
                })
                .await?;
            println!("{}", note.id);
            Ok(())
        }
        Commands::List => {
            for item in items.search("").await? {
                print_summary(&item);
            }
            Ok(())
        }
        Commands::Search { query } => {
            for item in items.search(&query).await? {
                print_summary(&item);
            }
            Ok(())
        }
        Commands::Show { id, reveal } => {
            match items.get_credential(&id).await {
                Ok(credential) => show_credential(vault, session, &credential, reveal).await,
                Err(SafepassError::NotFound { .. }) => {
                    let note = items.get_note(&id).await?;
                    show_note(vault, session, &note, reveal).await
                }
                Err(e) => Err(e),
            }
        }
        Commands::Delete { id } => {
            let deleted =
                items.delete_credential(&id).await? || items.delete_note(&id).await?;
            if !deleted {
                return Err(SafepassError::NotFound {
                    collection: "vault".to_string(),
                    id,
                });
            }
            println!("deleted {id}");
            Ok(())
        }
        Commands::ChangePassword => {
            let new_password = get_new_master_password()?;
            let report = vault.change_password(session, &new_password).await?;
            info!(key_id = %report.new_key_id, "master password changed");
            println!(
                "master password changed: {} item(s) re-encrypted, {} already current",
                report.reencrypted(),
                report.already_rotated()
            );
            Ok(())
        }
    }
}

fn print_summary(item: &VaultItem) {
    match item {
        VaultItem::Credential(c) => {
            println!("{}\tcredential\t{}\t{}", c.id, c.title, c.username)
        }
        VaultItem::Note(n) => println!(
            "{}\tnote\t{}\t{}",
            n.id,
            n.title,
            n.category.as_deref().unwrap_or("")
        ),
    }
}

async fn show_credential(
    vault: &Vault,
    session: &Session,
    credential: &Credential,
    reveal: bool,
) -> Result<(), SafepassError> {
    println!("id:       {}", credential.id);
    println!("title:    {}", credential.title);
    println!("username: {}", credential.username);
    for (label, value) in [
        ("url:     ", &credential.url),
        ("website: ", &credential.website),
        ("category:", &credential.category),
    ] {
        if let Some(value) = value {
            println!("{label} {value}");
        }
    }
    if reveal {
        let items = vault.items(session);
        let password = items.reveal_password(credential).await?;
        println!("password: {}", password.expose_secret());
        if let Some(notes) = items.reveal_notes(credential).await? {
            println!("notes:    {}", notes.expose_secret());
        }
    }
    Ok(())
}

async fn show_note(
    vault: &Vault,
    session: &Session,
    note: &Note,
    reveal: bool,
) -> Result<(), SafepassError> {
    println!("id:       {}", note.id);
    println!("title:    {}", note.title);
    if let Some(category) = &note.category {
        println!("category: {category}");
    }
    if reveal {
        match vault.items(session).reveal_content(note).await? {
            Some(content) => println!("content:  {}", content.expose_secret()),
            None => println!("content:  (dropped during key rotation)"),
        }
    }
    Ok(())
}
