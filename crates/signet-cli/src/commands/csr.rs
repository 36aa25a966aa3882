use signet_core::{CertRequestFormat, ClientId, KeyUsage, Signer};

use super::{done, write_output};
use crate::error::CliResult;

pub async fn generate(
    signer: &Signer,
    key_id: &str,
    subject: &str,
    usage: KeyUsage,
    member: Option<ClientId>,
    format: CertRequestFormat,
    out: Option<String>,
) -> CliResult<()> {
    let generated = signer
        .generate_cert_request(key_id, subject, usage, member, format)
        .await?;
    done(&format!("Certificate request {} ({})", generated.csr_id, generated.format));
    write_output(&generated.request, out)
}

pub fn delete(signer: &Signer, csr_id: &str) -> CliResult<()> {
    signer.delete_cert_request(csr_id)?;
    done(&format!("Certificate request {} deleted", csr_id));
    Ok(())
}
