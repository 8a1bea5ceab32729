use anyhow::Result;

use super::Context;

pub async fn run(ctx: &Context) -> Result<()> {
    let session = ctx.open_session().await?;
    let rotations = session.manager.rotation_history(&ctx.user).await?;
    let backups = session.manager.backup_history(&ctx.user).await?;

    if rotations.is_empty() && backups.is_empty() {
        println!("No key history for {}.", ctx.user);
        return Ok(());
    }

    println!("Rotations ({}):", rotations.len());
    println!("{:<22} {:<34} {:<34} REASON", "DATE", "OLD", "NEW");
    println!("{}", "-".repeat(100));
    for event in &rotations {
        println!(
            "{:<22} {:<34} {:<34} {}",
            event.rotated_at.format("%Y-%m-%d %H:%M:%S"),
            event.old_key_fingerprint,
            event.new_key_fingerprint,
            event.reason
        );
    }

    println!();
    println!("Backups ({}):", backups.len());
    println!("{:<38} {:<22} FINGERPRINT", "ID", "DATE");
    println!("{}", "-".repeat(94));
    for record in &backups {
        println!(
            "{:<38} {:<22} {}",
            record.id,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.backup_fingerprint
        );
    }

    Ok(())
}
