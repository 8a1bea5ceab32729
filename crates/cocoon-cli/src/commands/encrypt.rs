use anyhow::Result;

use super::Context;

pub async fn run(ctx: &Context, text: &str) -> Result<()> {
    let session = ctx.open_session().await?;
    let payload = session.provider.encrypt_for_user(&ctx.user, text).await?;
    println!("{}", payload.to_json()?);
    Ok(())
}
