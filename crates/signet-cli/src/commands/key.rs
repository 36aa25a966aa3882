use colored::Colorize;
use signet_core::Signer;

use super::{done, yes_no};
use crate::error::CliResult;

pub fn list(signer: &Signer) -> CliResult<()> {
    for token in signer.list_tokens()? {
        println!("{}", format!("令牌 {}", token.id).cyan().bold());
        if token.keys.is_empty() {
            println!("  (无密钥)");
        }
        for key in &token.keys {
            let usage = key.usage.map(|u| u.to_string()).unwrap_or_else(|| "-".to_string());
            println!(
                "  {} {} [{}] {} available: {}",
                key.id.bold(),
                key.friendly_name.as_deref().unwrap_or("-"),
                usage,
                key.sign_mechanism,
                yes_no(key.available)
            );
        }
    }
    Ok(())
}

pub async fn generate(signer: &Signer, token_id: &str, label: &str) -> CliResult<()> {
    let key = signer.generate_key(token_id, label).await?;
    done(&format!("Generated key {} on token {}", key.id, token_id));
    println!("  机制: {}", key.sign_mechanism);
    if let Some(public_key) = &key.public_key {
        println!("  公钥: {}", public_key);
    }
    Ok(())
}

pub async fn delete(signer: &Signer, key_id: &str, from_device: bool) -> CliResult<()> {
    signer.delete_key(key_id, from_device).await?;
    if from_device {
        done(&format!("Key {} deleted from token", key_id));
    } else {
        done(&format!("Key {} removed from configuration", key_id));
    }
    Ok(())
}
