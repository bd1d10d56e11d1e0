//! `parley summary | new | switch | delete`

use parley_core::UserId;

pub async fn summary(user: &UserId) -> Result<(), Box<dyn std::error::Error>> {
    let (_, manager) = super::manager().await?;
    let summary = manager.get_conversation_summary(user).await?;

    if summary.is_empty() {
        println!("No conversations yet. Run `parley chat` to start one.");
        return Ok(());
    }

    let current = manager.store().get_current_conversation_id(user).await?;
    let conversations = manager.get_conversations(user).await?;
    for (line, conv) in summary.lines().zip(&conversations) {
        let marker = if current.as_ref() == Some(&conv.id) { "*" } else { " " };
        println!("{marker} {line}");
    }
    Ok(())
}

pub async fn new(user: &UserId, system: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let (_, manager) = super::manager().await?;
    let conv = manager
        .start_new_conversation(user, system.as_deref(), None)
        .await?;
    println!("Started conversation {}", conv.id);
    Ok(())
}

pub async fn switch(user: &UserId, index: usize) -> Result<(), Box<dyn std::error::Error>> {
    let (_, manager) = super::manager().await?;
    match manager.switch_to_conversation(user, index).await? {
        Some(conv) => println!("Switched to #{index}: {}", conv.summary),
        None => println!("No conversation #{index}; nothing changed."),
    }
    Ok(())
}

pub async fn delete(user: &UserId, index: usize) -> Result<(), Box<dyn std::error::Error>> {
    let (_, manager) = super::manager().await?;
    let conversations = manager.get_conversations(user).await?;
    let Some(conv) = conversations.get(index) else {
        println!("No conversation #{index}; nothing deleted.");
        return Ok(());
    };

    manager.delete_conversation(user, conv).await?;
    println!("Deleted #{index}: {}", conv.summary);
    Ok(())
}
