//! `parley remember | prefs`

use clap::Subcommand;
use parley_core::UserId;

#[derive(Subcommand)]
pub enum PrefsAction {
    /// Set a preference (e.g. `timezone Europe/Paris`)
    Set { key: String, value: String },
    /// Remove a preference
    Forget { key: String },
    /// List every preference
    List,
}

pub async fn remember(user: &UserId, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (config, manager) = super::manager().await?;
    super::require_api_key(&config)?;

    let remembered = manager.remember(user, text).await?;
    if remembered.is_empty() {
        println!("Nothing to remember in that.");
    }
    for (key, value) in &remembered {
        println!("Remembered {key}: {value}");
    }
    Ok(())
}

pub async fn run(user: &UserId, action: PrefsAction) -> Result<(), Box<dyn std::error::Error>> {
    let (_, manager) = super::manager().await?;

    match action {
        PrefsAction::Set { key, value } => {
            manager.set_preference(user, &key, &value).await?;
            println!("Set {key}.");
        }
        PrefsAction::Forget { key } => {
            if manager.forget(user, &key).await? {
                println!("Forgot {key}.");
            } else {
                println!("No preference named {key}.");
            }
        }
        PrefsAction::List => {
            let prefs = manager.get_preferences(user).await?;
            if prefs.is_empty() {
                println!("No preferences stored.");
            }
            for (key, value) in &prefs {
                println!("{key}: {value}");
            }
        }
    }
    Ok(())
}
