use std::time::{Duration, SystemTime};

use colored::Colorize;
use signet_core::{CertStatus, ClientId, KeyUsage, Signer};
use signet_pki::X509Certificate;

use super::{done, format_time, write_output, yes_no};
use crate::error::{CliError, CliResult};

pub fn list(signer: &Signer) -> CliResult<()> {
    for token in signer.list_tokens()? {
        for key in &token.keys {
            if key.certs.is_empty() && key.cert_requests.is_empty() {
                continue;
            }
            println!("{}", format!("密钥 {} (令牌 {})", key.id, token.id).cyan().bold());

            for info in &key.certs {
                let cert = X509Certificate::from_der(&info.certificate)?;
                println!("  证书 {}", info.id.bold());
                println!("    主题: {}", cert.subject_string());
                println!("    哈希: {}", info.hash());
                println!(
                    "    有效期: {} .. {}",
                    format_time(cert.not_before()),
                    format_time(cert.not_after())
                );
                println!("    状态: {}", info.status);
                if let Some(member) = &info.member_id {
                    println!("    成员: {}", member);
                }
                println!(
                    "    active: {}  saved: {}  ocsp: {}",
                    yes_no(info.active),
                    yes_no(info.saved_to_configuration),
                    yes_no(info.ocsp_response.is_some())
                );
            }
            for csr in &key.cert_requests {
                println!("  证书请求 {} [{}] {}", csr.id.bold(), csr.usage, csr.subject_name);
            }
        }
    }
    Ok(())
}

pub async fn import(
    signer: &Signer,
    file: &str,
    status: CertStatus,
    member: Option<ClientId>,
) -> CliResult<()> {
    let bytes = std::fs::read(file)?;
    let key_id = signer.import_certificate(&bytes, status, member).await?;
    done(&format!("Certificate imported to key {}", key_id));
    Ok(())
}

pub async fn delete(signer: &Signer, cert_id: &str) -> CliResult<()> {
    signer.delete_certificate(cert_id).await?;
    done(&format!("Certificate {} deleted", cert_id));
    Ok(())
}

pub async fn self_signed(
    signer: &Signer,
    key_id: &str,
    common_name: &str,
    days: u64,
    usage: KeyUsage,
    member: Option<ClientId>,
    out: Option<String>,
) -> CliResult<()> {
    if days == 0 {
        return Err(CliError::InvalidInput("--days must be positive".to_string()));
    }
    let not_before = SystemTime::now();
    let not_after = not_before
        .checked_add(Duration::from_secs(days.saturating_mul(86_400)))
        .ok_or_else(|| CliError::InvalidInput(format!("--days {} is out of range", days)))?;

    let der = signer
        .generate_self_signed_certificate(key_id, common_name, not_before, not_after, usage, member)
        .await?;
    let cert = X509Certificate::from_der(&der)?;
    done(&format!("Self-signed certificate {} imported", cert.hash()));
    write_output(cert.to_pem().as_bytes(), out)
}

pub fn set_active(signer: &Signer, cert_id: &str, active: bool) -> CliResult<()> {
    signer.activate_cert(cert_id, active)?;
    if active {
        done(&format!("Certificate {} activated", cert_id));
    } else {
        done(&format!("Certificate {} deactivated", cert_id));
    }
    Ok(())
}

/// OCSP responses read from `files`, paired with `hashes` by position
fn read_responses(hashes: &[String], files: &[String]) -> CliResult<Vec<Vec<u8>>> {
    if hashes.len() != files.len() {
        return Err(CliError::InvalidInput(format!(
            "{} --hash values but {} --file values",
            hashes.len(),
            files.len()
        )));
    }
    Ok(files
        .iter()
        .map(std::fs::read)
        .collect::<std::io::Result<Vec<_>>>()?)
}

pub fn set_ocsp(signer: &Signer, hashes: &[String], files: &[String]) -> CliResult<()> {
    let responses = read_responses(hashes, files)?;
    signer.set_ocsp_responses(hashes, responses)?;
    done(&format!("Stored {} OCSP response(s)", hashes.len()));
    Ok(())
}

pub async fn refresh_ocsp(signer: &Signer) -> CliResult<()> {
    let refreshed = signer.refresh_ocsp_responses().await?;
    done(&format!("Refreshed {} OCSP response(s)", refreshed));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_responses() {
        let dir = std::env::temp_dir().join(format!("signet-ocsp-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("a.ocsp");
        std::fs::write(&path, [0x30, 0x03]).unwrap();
        let file = path.display().to_string();

        let responses = read_responses(&["ab".to_string()], &[file.clone()]).unwrap();
        assert_eq!(responses, vec![vec![0x30, 0x03]]);

        let err = read_responses(&["ab".to_string(), "cd".to_string()], &[file]).unwrap_err();
        assert!(matches!(err, CliError::InvalidInput(_)));
        assert!(read_responses(&["ab".to_string()], &[dir.join("missing").display().to_string()]).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
