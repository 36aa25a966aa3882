use colored::Colorize;
use signet_core::{ClientId, SecurityServerId, Signer};

use crate::error::CliResult;

pub fn auth_key(signer: &Signer, server: &SecurityServerId) -> CliResult<()> {
    let auth = signer.get_auth_key(server)?;
    println!("{}", format!("认证密钥 ({})", server).cyan().bold());
    println!("  alias: {}", auth.alias);
    println!("  key store: {}", auth.key_store_path.display());
    println!("  certificate: {}", auth.certificate.hash());
    Ok(())
}

pub fn signing_info(signer: &Signer, member: &ClientId) -> CliResult<()> {
    let info = signer.get_member_signing_info(member)?;
    println!("{}", format!("签名信息 ({})", member).cyan().bold());
    println!("  key: {}", info.key_id);
    println!("  mechanism: {}", info.sign_mechanism);
    println!("  certificate: {}", info.certificate.hash());
    Ok(())
}
