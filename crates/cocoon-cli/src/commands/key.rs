use anyhow::Result;

use super::Context;

pub async fn run(ctx: &Context) -> Result<()> {
    let session = ctx.open_session().await?;
    let key = session.provider.active_key(&ctx.user).await?;

    println!("User:         {}", ctx.user);
    println!("Provider:     {}", session.provider.name());
    println!("Fingerprint:  {}", key.fingerprint());
    println!("Version:      {}", key.version);
    println!("Algorithm:    {}", key.algorithm);
    println!("Source:       {}", key.source);
    println!(
        "Created:      {}",
        key.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    let known = session.manager.list_key_fingerprints(&ctx.user).await?;
    if known.len() > 1 {
        println!("Retired keys: {}", known.len() - 1);
    }

    Ok(())
}
