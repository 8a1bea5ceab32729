use anyhow::Result;

use cocoon_core::types::KeySource;

use super::Context;

pub async fn run(ctx: &Context, reason: &str) -> Result<()> {
    let session = ctx.open_session().await?;
    let key = session.provider.rotate_key(&ctx.user, reason).await?;

    println!("Rotated key for {}", ctx.user);
    println!("  New fingerprint: {}", key.fingerprint());
    println!("  Version:         {}", key.version);
    println!();
    println!("{}", readability_notice(&key.source));

    Ok(())
}

/// What happens to entries sealed under the replaced key.
fn readability_notice(source: &KeySource) -> &'static str {
    match source {
        KeySource::Local => {
            "Existing entries stay readable. Run `cocoon backup` to export the new key."
        }
        KeySource::Kms { .. } => {
            "Warning: the previous KMS key is not kept on this device. Entries sealed \
             under it cannot be decrypted in later sessions."
        }
    }
}
