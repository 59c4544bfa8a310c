use aws_config::{BehaviorVersion, Region, SdkConfig};
use cloudhelper_config::Config;

pub use cloudhelper_config as config;

pub mod cognito;
pub mod directory;
pub mod lambda;
pub mod s3;
mod error;

pub use cognito::Cognito;
pub use error::DirectoryError;
pub use lambda::Lambda;
pub use s3::S3;

/// Clients of all supported services, sharing one AWS configuration.
#[derive(Clone)]
pub struct Aws {
    pub s3: S3,
    pub lambda: Lambda,
    pub cognito: Cognito,
}

impl Aws {
    /// Creates clients from the default AWS configuration chain (environment,
    /// profile, instance metadata). `region` overrides the configured region.
    pub async fn new(region: Option<&str>) -> Aws {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let sdk_config = loader.load().await;
        log::debug!("aws configuration loaded, region: {:?}", sdk_config.region());

        Self::from_sdk_config(&sdk_config)
    }

    /// Like `new`, taking the region from the `REGION` key if present.
    pub async fn from_config(cfg: &impl Config) -> Aws {
        let region = cfg.get_opt(config::REGION);
        Self::new(region.as_deref()).await
    }

    pub fn from_sdk_config(sdk_config: &SdkConfig) -> Aws {
        Aws {
            s3: S3::new(aws_sdk_s3::Client::new(sdk_config)),
            lambda: Lambda::new(aws_sdk_lambda::Client::new(sdk_config)),
            cognito: Cognito::new(aws_sdk_cognitoidentityprovider::Client::new(sdk_config)),
        }
    }
}

pub fn init_logging(cfg: &impl Config) {
    let rust_log_config = cfg.get(config::RUST_LOG).ok();
    let mut logger_builder = env_logger::builder();
    if let Some(rust_log) = rust_log_config {
        logger_builder.parse_filters(&rust_log);
    } else {
        logger_builder.filter_level(log::LevelFilter::Info);
    }
    logger_builder.init();
    log::debug!("max logging level is: {}.", log::max_level());
}
