use anyhow::Result;

use cocoon_core::types::EncryptedPayload;

use super::Context;

pub async fn run(ctx: &Context, payload_json: &str) -> Result<()> {
    let payload = EncryptedPayload::from_json(payload_json)?;
    let session = ctx.open_session().await?;
    let plaintext = session.provider.decrypt_for_user(&ctx.user, &payload).await?;
    println!("{plaintext}");
    Ok(())
}
