use anyhow::Result;

use super::Context;

pub async fn run(ctx: &Context, cli_password: &Option<String>) -> Result<()> {
    let session = ctx.open_session().await?;
    // Make sure there is something to export.
    session.manager.get_or_create_active_key(&ctx.user).await?;

    let password = crate::get_password(cli_password, "Backup password: ")?;
    if cli_password.is_none() {
        let confirm = crate::get_password(&None, "Confirm password: ")?;
        if *confirm != *password {
            anyhow::bail!("Passwords do not match");
        }
    }

    let backup = session.backups.create_backup(&ctx.user, &password).await?;

    eprintln!("Key backup for {} (store it somewhere safe):", ctx.user);
    println!("{backup}");
    Ok(())
}
