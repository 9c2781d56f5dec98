use anyhow::{anyhow, bail, Result};
use std::{env, path::PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Postgres { url: String },
    Rest { url: String, key: String },
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    pub port: u16,
    pub seed_catalog: bool,
    pub seed_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |k: &str| get(k).ok_or_else(|| anyhow!("{k} not set"));
        let backend = match get("STORE").as_deref().unwrap_or("postgres") {
            "postgres" => Backend::Postgres { url: required("DATABASE_URL")? },
            "rest" => Backend::Rest {
                url: required("BACKEND_URL")?,
                key: required("BACKEND_KEY")?,
            },
            "memory" => Backend::Memory,
            other => bail!("unknown STORE `{other}` (expected postgres, rest or memory)"),
        };
        let port = match get("PORT") {
            Some(p) => p.parse().map_err(|_| anyhow!("PORT `{p}` is not a port number"))?,
            None => 8081,
        };
        let seed_catalog = get("SEED_CATALOG")
            .map(|v| !matches!(v.as_str(), "0" | "false" | "no"))
            .unwrap_or(true);
        Ok(Config {
            backend,
            port,
            seed_catalog,
            seed_dir: get("SEED_DIR").map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn postgres_is_the_default_and_needs_a_url() {
        assert!(cfg(&[]).is_err());
        let c = cfg(&[("DATABASE_URL", "postgres://localhost/training")]).unwrap();
        assert_eq!(c.backend, Backend::Postgres { url: "postgres://localhost/training".into() });
        assert_eq!(c.port, 8081);
        assert!(c.seed_catalog);
    }

    #[test]
    fn rest_backend_needs_url_and_key() {
        assert!(cfg(&[("STORE", "rest"), ("BACKEND_URL", "https://x.test")]).is_err());
        let c = cfg(&[("STORE", "rest"), ("BACKEND_URL", "https://x.test"), ("BACKEND_KEY", "k")]).unwrap();
        assert!(matches!(c.backend, Backend::Rest { .. }));
    }

    #[test]
    fn memory_backend_with_overrides() {
        let c = cfg(&[("STORE", "memory"), ("PORT", "9000"), ("SEED_CATALOG", "false"), ("SEED_DIR", "./seed")]).unwrap();
        assert_eq!(c.backend, Backend::Memory);
        assert_eq!(c.port, 9000);
        assert!(!c.seed_catalog);
        assert_eq!(c.seed_dir, Some(PathBuf::from("./seed")));
        assert!(cfg(&[("STORE", "sqlite")]).is_err());
        assert!(cfg(&[("STORE", "memory"), ("PORT", "http")]).is_err());
    }
}
