use std::collections::HashMap;

use anyhow::{Result, anyhow};
use dotenv::*;

/// AWS region for all service clients. Falls back to the SDK's default
/// provider chain when unset.
pub const REGION: &str = "REGION";
/// Cognito user pool the command line tool operates on.
pub const USER_POOL_ID: &str = "USER_POOL_ID";
/// Page size for user listings.
pub const LIST_LIMIT: &str = "LIST_LIMIT";
pub const RUST_LOG: &str = "RUST_LOG";

pub trait Config: Send + Sync{
    fn get(&self, key: &str) -> Result<String>;
    fn clone_box_dyn(&self) -> Box<dyn Config>;

    /// Like `get`, but treats a missing key as `None` instead of an error.
    fn get_opt(&self, key: &str) -> Option<String> {
        self.get(key).ok()
    }
}

impl Clone for Box<dyn Config> {
    fn clone(&self) -> Self {
        self.clone_box_dyn()
    }
}

impl Config for Box<dyn Config> {
    fn get(&self, key: &str) -> Result<String> {
        (**self).get(key)
    }

    fn clone_box_dyn(&self) -> Box<dyn Config> {
        (**self).clone_box_dyn()
    }
}

#[derive(Clone)]
pub struct CompositeConfig {
    main: Box<dyn Config>,
    fallback: Box<dyn Config>,
}

impl CompositeConfig {
    pub fn from_configs(main: Box<dyn Config>, fallback: Box<dyn Config>) -> CompositeConfig {
        CompositeConfig{ main, fallback }
    }
}

impl Config for CompositeConfig {
    fn get(&self, key: &str) -> Result<String> {
        self.main
        .get(key)
        .or_else(|_e| self.fallback.get(key))
    }

    fn clone_box_dyn(&self) -> Box<dyn Config> {
        Box::new(CompositeConfig {
            main: self.main.clone_box_dyn(),
            fallback: self.fallback.clone_box_dyn()
        })
    }
}

/// Reads values from the process environment, after loading a `.env` file
/// if one can be found.
#[derive(Clone)]
pub struct EnvConfig;

impl EnvConfig {
    pub fn from_env() -> EnvConfig {
        // logging is not set up yet at this point, so report on stdout
        match dotenv() {
            Ok(path) => {
                let path = path.to_string_lossy();
                println!("additional environment variables loaded from {path}");
            }
            Err(e) if e.not_found() => {}
            Err(e) => {
                println!("error while attempting to load .env file: {e}");
            }
        }

        EnvConfig
    }
}

impl Config for EnvConfig{
    fn get(&self, key: &str) -> Result<String> {
        std::env::var(key).map_err(|_| anyhow!("no such environment variable {key}"))
    }
    fn clone_box_dyn(&self) -> Box<dyn Config> {
        Box::new(self.clone())
    }
}

pub fn default_config() -> impl Config {
    let default_values = [
        // ListUsers refuses anything above 60
        (LIST_LIMIT, "60"),
    ];
    let mut default_config = HashMap::<String,String>::new();
    for (k,v) in default_values {
        default_config.insert(k.to_string(), v.to_string());
    }
    HashMapConfig::new(default_config)
}

#[derive(Clone)]
pub struct HashMapConfig {
    map: HashMap<String,String>
}

impl HashMapConfig {
    pub fn new(map: HashMap<String,String>) -> HashMapConfig {
        Self {map}
    }
}

impl Config for HashMapConfig {
    fn get(&self, key: &str) -> Result<String> {
        self.map
        .get(key)
        .map(String::clone)
        .ok_or_else(||anyhow!("key '{key}' not found"))
    }

    fn clone_box_dyn(&self) -> Box<dyn Config> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
fn map_config(values: &[(&str, &str)]) -> HashMapConfig {
    HashMapConfig::new(values.iter().map(|(k,v)|(k.to_string(), v.to_string())).collect())
}

#[test]
fn test_composite_prefers_main() {
    let config = CompositeConfig::from_configs(
        Box::new(map_config(&[(REGION, "eu-central-1")])),
        Box::new(map_config(&[(REGION, "us-east-1"), (USER_POOL_ID, "pool-1")])),
    );
    assert_eq!(config.get(REGION).unwrap(), "eu-central-1");
    assert_eq!(config.get(USER_POOL_ID).unwrap(), "pool-1");
    assert!(config.get("UNKNOWN").is_err());
    assert_eq!(config.get_opt("UNKNOWN"), None);
}

#[test]
fn test_default_config() {
    let config = default_config();
    assert_eq!(config.get(LIST_LIMIT).unwrap(), "60");
    assert!(config.get(REGION).is_err());

    let cloned = config.clone_box_dyn();
    assert_eq!(cloned.get(LIST_LIMIT).unwrap(), "60");
}
