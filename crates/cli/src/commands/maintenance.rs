//! `parley compress | merge | consolidate | knowledge`

use parley_core::UserId;

pub async fn compress(user: &UserId) -> Result<(), Box<dyn std::error::Error>> {
    let (config, manager) = super::manager().await?;
    super::require_api_key(&config)?;

    let count = manager.compress_conversations(user).await?;
    println!("Compressed {count} conversation(s).");
    Ok(())
}

pub async fn merge(user: &UserId, a: usize, b: usize) -> Result<(), Box<dyn std::error::Error>> {
    let (config, manager) = super::manager().await?;
    super::require_api_key(&config)?;

    if manager.merge_conversations(user, a, b).await? {
        println!("Merged #{b} into #{a}.");
    } else {
        println!("Nothing merged.");
    }
    Ok(())
}

pub async fn merge_similar(user: &UserId) -> Result<(), Box<dyn std::error::Error>> {
    let (config, manager) = super::manager().await?;
    super::require_api_key(&config)?;

    let count = manager.merge_similar(user).await?;
    println!("Merged {count} pair(s).");
    Ok(())
}

pub async fn consolidate(user: &UserId) -> Result<(), Box<dyn std::error::Error>> {
    let (config, manager) = super::manager().await?;
    super::require_api_key(&config)?;

    let knowledge = manager.consolidate_knowledge(user).await?;
    print_knowledge(&knowledge);
    Ok(())
}

pub async fn knowledge(user: &UserId) -> Result<(), Box<dyn std::error::Error>> {
    let (_, manager) = super::manager().await?;
    print_knowledge(&manager.get_knowledge(user).await?);
    Ok(())
}

fn print_knowledge(knowledge: &str) {
    if knowledge.trim().is_empty() {
        println!("No knowledge digest yet.");
    } else {
        println!("{knowledge}");
    }
}
