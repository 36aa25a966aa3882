use colored::Colorize;
use signet_core::Signer;

use super::{done, yes_no};
use crate::error::CliResult;

pub async fn init(signer: &Signer, pin: &str) -> CliResult<()> {
    signer.init_software_token(pin).await?;
    done("Software token initialized");
    Ok(())
}

pub fn list(signer: &Signer) -> CliResult<()> {
    let tokens = signer.list_tokens()?;
    println!("{}", format!("令牌 ({})", tokens.len()).cyan().bold());

    for token in tokens {
        println!();
        println!(
            "{} {}",
            token.id.bold(),
            token.friendly_name.as_deref().unwrap_or("-")
        );
        println!("  类型: {}", token.token_type);
        if let Some(serial) = &token.serial_number {
            println!("  序列号: {}", serial);
        }
        if let Some(label) = &token.label {
            println!("  标签: {}", label);
        }
        if let Some(slot) = token.slot_index {
            println!("  插槽: {}", slot);
        }
        println!("  状态: {:?}", token.status);
        println!(
            "  active: {}  available: {}  read-only: {}",
            yes_no(token.active),
            yes_no(token.available),
            yes_no(token.read_only)
        );
        println!("  密钥数: {}", token.keys.len());
    }
    Ok(())
}
