use anyhow::Result;

use super::Context;

pub async fn run(
    ctx: &Context,
    backup: &str,
    verify_only: bool,
    cli_password: &Option<String>,
) -> Result<()> {
    let session = ctx.open_session().await?;
    let password = crate::get_password(cli_password, "Backup password: ")?;

    if verify_only {
        let fingerprint = session.backups.verify_backup(backup, &password).await?;
        println!("Backup is valid");
        println!("  Fingerprint: {fingerprint}");
        let active = session.manager.active_key(&ctx.user).await.ok();
        if active.is_some_and(|key| key.fingerprint() == fingerprint) {
            println!("  Matches the active key for {}", ctx.user);
        }
        return Ok(());
    }

    session
        .backups
        .restore_from_backup(&ctx.user, backup, &password)
        .await?;

    let active = session.manager.active_key(&ctx.user).await?;
    println!("Restored key for {}", ctx.user);
    println!("  Fingerprint: {}", active.fingerprint());
    println!("  Version:     {}", active.version);
    Ok(())
}
