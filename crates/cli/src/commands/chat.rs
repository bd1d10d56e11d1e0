//! `parley chat`: interactive or single-message chat.

use std::io::Write;

use parley_core::UserId;
use parley_session::{ConversationManager, Routing, TurnOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(user: &UserId, message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let (config, manager) = super::manager().await?;
    super::require_api_key(&config)?;

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let outcome = manager.handle_message(user, &msg).await;
        eprint!("\r              \r");
        let outcome = outcome?;
        print_routing(&manager, user, &outcome).await;
        println!("{}", outcome.reply);
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  Parley: interactive mode");
    println!();
    println!("  User:      {user}");
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", config.default_model);
    println!("  Store:     {}", manager.store().name());
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit") {
            break;
        }
        if !text.is_empty() {
            eprint!("  ...");
            match manager.handle_message(user, text).await {
                Ok(outcome) => {
                    eprint!("\r     \r");
                    print_routing(&manager, user, &outcome).await;
                    println!();
                    for line in outcome.reply.lines() {
                        println!("  Assistant > {line}");
                    }
                    println!();
                }
                Err(e) => {
                    eprint!("\r     \r");
                    eprintln!("  [Error] {e}");
                    println!();
                }
            }
        }

        print!("  You > ");
        std::io::stdout().flush()?;
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

async fn print_routing(manager: &ConversationManager, user: &UserId, outcome: &TurnOutcome) {
    if outcome.routing == Routing::Continue && !outcome.created {
        return;
    }
    let index = manager
        .get_conversations(user)
        .await
        .ok()
        .and_then(|convs| convs.iter().position(|c| c.id == outcome.conversation_id));

    match (outcome.created, index) {
        (true, Some(i)) => eprintln!("  (started conversation #{i})"),
        (false, Some(i)) => eprintln!("  (switched to conversation #{i})"),
        _ => {}
    }
}
