//! Signet 令牌与证书管理命令行工具

mod commands;
mod error;

use std::{path::Path, sync::Arc};

use clap::{Parser, Subcommand};
use error::CliResult;
use signet_core::{
    logging::init_tracing, ocsp_client::client_from_settings, CertRequestFormat, CertStatus,
    ClientId, KeyUsage, MemoryGlobalConf, SecurityServerId, Settings, Signer,
};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "signet")]
#[command(about = "Signet 令牌、密钥与证书管理工具")]
#[command(version)]
struct Cli {
    /// 配置文件
    #[arg(short, long, global = true, default_value = "signet.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 初始化软件令牌
    InitToken {
        #[arg(short, long)]
        pin: String,
    },

    /// 列出令牌
    ListTokens,

    /// 列出密钥
    ListKeys,

    /// 列出证书与证书请求
    ListCerts,

    /// 生成新的密钥对
    GenerateKey {
        #[arg(short, long, default_value = "0")]
        token: String,

        #[arg(short, long)]
        label: String,

        #[arg(short, long)]
        pin: Option<String>,
    },

    /// 生成证书请求
    GenerateCsr {
        #[arg(short, long)]
        key: String,

        /// e.g. "C=EE, O=Org, CN=member"
        #[arg(short, long)]
        subject: String,

        /// signing | authentication
        #[arg(short, long, default_value = "signing")]
        usage: KeyUsage,

        /// INSTANCE/CLASS/CODE[/SUBSYSTEM]
        #[arg(short, long)]
        member: Option<ClientId>,

        #[arg(short, long, default_value = "pem")]
        format: CertRequestFormat,

        /// 输出文件，默认打印到标准输出
        #[arg(short, long)]
        out: Option<String>,

        #[arg(short, long)]
        pin: Option<String>,
    },

    /// 导入证书 (PEM 或 DER)
    ImportCert {
        #[arg(short, long)]
        file: String,

        #[arg(short, long, default_value = "registered")]
        status: CertStatus,

        #[arg(short, long)]
        member: Option<ClientId>,
    },

    /// 删除证书
    DeleteCert {
        #[arg(long)]
        id: String,
    },

    /// 删除证书请求
    DeleteCsr {
        #[arg(long)]
        id: String,
    },

    /// 删除密钥
    DeleteKey {
        #[arg(long)]
        id: String,

        /// Also remove the key from the token
        #[arg(long)]
        from_device: bool,

        #[arg(short, long)]
        pin: Option<String>,
    },

    /// 生成自签名证书
    SelfSigned {
        #[arg(short, long)]
        key: String,

        #[arg(long)]
        cn: String,

        #[arg(short, long, default_value_t = 365)]
        days: u64,

        #[arg(short, long, default_value = "signing")]
        usage: KeyUsage,

        #[arg(short, long)]
        member: Option<ClientId>,

        #[arg(short, long)]
        out: Option<String>,

        #[arg(short, long)]
        pin: Option<String>,
    },

    /// 启用证书
    ActivateCert {
        #[arg(long)]
        id: String,
    },

    /// 停用证书
    DeactivateCert {
        #[arg(long)]
        id: String,
    },

    /// 写入外部获取的 OCSP 响应 (DER)
    SetOcsp {
        /// Certificate SHA-1 hash, once per response
        #[arg(long = "hash", required = true)]
        hashes: Vec<String>,

        /// OCSP response file, in the same order as --hash
        #[arg(long = "file", required = true)]
        files: Vec<String>,
    },

    /// 向配置的应答器刷新全部 OCSP 响应
    RefreshOcsp,

    /// 查询安全服务器的认证密钥
    AuthKey {
        /// INSTANCE/CLASS/CODE/SERVER
        #[arg(short, long)]
        server: SecurityServerId,

        #[arg(short, long)]
        pin: Option<String>,
    },

    /// 查询成员的签名信息
    SigningInfo {
        #[arg(short, long)]
        member: ClientId,

        #[arg(short, long)]
        pin: Option<String>,
    },

    /// 设置令牌名称
    SetTokenName {
        #[arg(short, long)]
        token: String,

        #[arg(short, long)]
        name: String,
    },

    /// 设置密钥名称
    SetKeyName {
        #[arg(short, long)]
        key: String,

        #[arg(short, long)]
        name: String,
    },
}

fn load_settings(path: &str) -> CliResult<Settings> {
    if Path::new(path).exists() {
        Ok(Settings::load(path)?)
    } else {
        Ok(Settings::default())
    }
}

/// Log in to the software token when a PIN is given
async fn login(signer: &Signer, pin: Option<&str>) -> CliResult<()> {
    if let Some(pin) = pin {
        signer.activate_token(signet_core::token::SOFTWARE_TOKEN_ID, pin).await?;
    }
    Ok(())
}

async fn run(cli: Cli) -> CliResult<()> {
    let settings = load_settings(&cli.config)?;
    init_tracing(&settings.logging.level);
    if !Path::new(&cli.config).exists() {
        warn!("Config {} not found, using defaults", cli.config);
    }

    let globalconf = Arc::new(MemoryGlobalConf::from_settings(&settings.globalconf)?);
    let ocsp_client = client_from_settings(&settings.ocsp)?;
    let signer = Signer::start(&settings, globalconf, ocsp_client).await?;

    match cli.command {
        Commands::InitToken { pin } => commands::token::init(&signer, &pin).await?,
        Commands::ListTokens => commands::token::list(&signer)?,
        Commands::ListKeys => commands::key::list(&signer)?,
        Commands::ListCerts => commands::cert::list(&signer)?,
        Commands::GenerateKey { token, label, pin } => {
            login(&signer, pin.as_deref()).await?;
            commands::key::generate(&signer, &token, &label).await?;
        }
        Commands::GenerateCsr {
            key,
            subject,
            usage,
            member,
            format,
            out,
            pin,
        } => {
            login(&signer, pin.as_deref()).await?;
            commands::csr::generate(&signer, &key, &subject, usage, member, format, out).await?;
        }
        Commands::ImportCert { file, status, member } => {
            commands::cert::import(&signer, &file, status, member).await?
        }
        Commands::DeleteCert { id } => commands::cert::delete(&signer, &id).await?,
        Commands::DeleteCsr { id } => commands::csr::delete(&signer, &id)?,
        Commands::DeleteKey { id, from_device, pin } => {
            login(&signer, pin.as_deref()).await?;
            commands::key::delete(&signer, &id, from_device).await?;
        }
        Commands::SelfSigned {
            key,
            cn,
            days,
            usage,
            member,
            out,
            pin,
        } => {
            login(&signer, pin.as_deref()).await?;
            commands::cert::self_signed(&signer, &key, &cn, days, usage, member, out).await?;
        }
        Commands::ActivateCert { id } => commands::cert::set_active(&signer, &id, true)?,
        Commands::DeactivateCert { id } => commands::cert::set_active(&signer, &id, false)?,
        Commands::SetOcsp { hashes, files } => commands::cert::set_ocsp(&signer, &hashes, &files)?,
        Commands::RefreshOcsp => commands::cert::refresh_ocsp(&signer).await?,
        Commands::AuthKey { server, pin } => {
            login(&signer, pin.as_deref()).await?;
            commands::selection::auth_key(&signer, &server)?;
        }
        Commands::SigningInfo { member, pin } => {
            login(&signer, pin.as_deref()).await?;
            commands::selection::signing_info(&signer, &member)?;
        }
        Commands::SetTokenName { token, name } => {
            signer.set_token_friendly_name(&token, &name)?;
            commands::done(&format!("Token '{}' renamed to '{}'", token, name));
        }
        Commands::SetKeyName { key, name } => {
            signer.set_key_friendly_name(&key, &name)?;
            commands::done(&format!("Key '{}' renamed to '{}'", key, name));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        commands::fail(&e.to_string());
        std::process::exit(1);
    }
}
