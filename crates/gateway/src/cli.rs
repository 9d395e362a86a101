use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use reqwest::Url;

use iskoces_gateway_engine::{DEFAULT_CHUNK_BYTES, EngineKind, PoolConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Engine {
    /// LibreTranslate-based worker subprocesses.
    Libretranslate,
    /// Argos-translate-based worker subprocesses.
    Argos,
}

impl From<Engine> for EngineKind {
    fn from(engine: Engine) -> Self {
        match engine {
            Engine::Libretranslate => EngineKind::Libretranslate,
            Engine::Argos => EngineKind::Argos,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "iskoces-gateway",
    version,
    about = "Translation gateway over a pool of supervised translator workers"
)]
pub struct Cli {
    /// Translator engine the worker subprocesses run (metrics label only).
    #[arg(long, env = "ISKOCES_ENGINE", value_enum, default_value_t = Engine::Argos)]
    pub engine: Engine,

    /// Number of translator worker subprocesses.
    #[arg(
        long,
        env = "ISKOCES_MAX_WORKERS",
        default_value_t = PoolConfig::DEFAULT_MAX_WORKERS as u16,
        value_parser = clap::value_parser!(u16).range(1..=128)
    )]
    pub max_workers: u16,

    /// Byte budget for document chunking.
    #[arg(
        long,
        env = "ISKOCES_CHUNK_SIZE_BYTES",
        default_value_t = DEFAULT_CHUNK_BYTES as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub chunk_size_bytes: u64,

    /// Directory for the per-worker rendezvous sockets.
    #[arg(long, env = "ISKOCES_RENDEZVOUS_DIR", default_value = PoolConfig::DEFAULT_RENDEZVOUS_DIR)]
    pub rendezvous_dir: PathBuf,

    /// Program executed per worker; the worker's socket path is always
    /// appended as the final argument.
    #[arg(long, env = "ISKOCES_WORKER_COMMAND", default_value = "python3")]
    pub worker_command: String,

    /// Worker script passed to the command before the socket path.
    #[arg(long, env = "ISKOCES_WORKER_SCRIPT")]
    pub worker_script: Option<PathBuf>,

    /// Address the HTTP adapter listens on.
    #[arg(long, env = "ISKOCES_LISTEN", default_value = "127.0.0.1:8089")]
    pub listen: SocketAddr,

    /// Translate through a remote LibreTranslate-compatible endpoint instead
    /// of local worker subprocesses.
    #[arg(long, env = "ISKOCES_HTTP_FALLBACK_URL")]
    pub http_fallback_url: Option<Url>,

    /// API key for the HTTP fallback endpoint.
    #[arg(long, env = "ISKOCES_HTTP_FALLBACK_API_KEY")]
    pub http_fallback_api_key: Option<String>,

    /// Age after which finished jobs are garbage collected, in seconds.
    #[arg(long, env = "ISKOCES_JOB_MAX_AGE_SECS", default_value_t = 3600)]
    pub job_max_age_secs: u64,
}

impl Cli {
    pub fn engine_kind(&self) -> EngineKind {
        self.engine.into()
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            engine: self.engine.into(),
            max_workers: usize::from(self.max_workers),
            rendezvous_dir: self.rendezvous_dir.clone(),
            worker_command: self.worker_command.clone(),
            worker_script: self.worker_script.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Engine};

    #[test]
    fn defaults_match_the_documented_configuration() {
        let cli = Cli::parse_from(["iskoces-gateway"]);
        assert_eq!(cli.engine, Engine::Argos);
        assert_eq!(cli.max_workers, 4);
        assert_eq!(cli.chunk_size_bytes, 10240);
        assert_eq!(
            cli.rendezvous_dir.to_str().unwrap(),
            "/tmp/iskoces-workers"
        );
        assert!(cli.http_fallback_url.is_none());
    }

    #[test]
    fn max_workers_must_be_positive() {
        assert!(Cli::try_parse_from(["iskoces-gateway", "--max-workers", "0"]).is_err());
    }
}
