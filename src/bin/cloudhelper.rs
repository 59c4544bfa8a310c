use std::io::Write;

use anyhow::{anyhow, Context, Result};
use cloudhelper::config::{default_config, CompositeConfig, Config, EnvConfig, LIST_LIMIT, USER_POOL_ID};
use cloudhelper::s3::ListObjects;
use cloudhelper::{Aws, Cognito, S3};

const USAGE: &str = "usage: cloudhelper <command>

commands:
    user <sub>            look up a user of USER_POOL_ID by sub
    users [filter]        list one page of users of USER_POOL_ID
    count                 estimated number of users in USER_POOL_ID
    get <bucket> <key>    write an S3 object to stdout
    ls <bucket> [prefix]  list S3 object keys";

fn user_pool_id(config: &impl Config) -> Result<String> {
    config.get(USER_POOL_ID)
    .map_err(|_| anyhow!("no user pool configured, set {USER_POOL_ID} variable"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = CompositeConfig::from_configs(
        Box::new(EnvConfig::from_env()),
        Box::new(default_config())
    );
    cloudhelper::init_logging(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let aws = Aws::from_config(&config).await;

    match args.as_slice() {
        ["user", sub] => {
            let pool_id = user_pool_id(&config)?;
            let user = aws.cognito.cache().get(&pool_id, sub).await?;
            let json = serde_json::json!({
                "username": user.username(),
                "attributes": Cognito::user_attributes(&user),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        ["users", filter @ ..] => {
            let pool_id = user_pool_id(&config)?;
            let limit = config.get(LIST_LIMIT)?
                .parse()
                .with_context(|| format!("{LIST_LIMIT} is not a number"))?;
            let page = aws.cognito.list(&pool_id, limit, filter.first().unwrap_or(&""), None).await?;
            for user in &page.users {
                println!("{}", user.username().unwrap_or_default());
            }
            if page.pagination_token.is_some() {
                log::info!("more users available");
            }
        }
        ["count"] => {
            let pool_id = user_pool_id(&config)?;
            println!("{}", aws.cognito.length(&pool_id).await?);
        }
        ["get", bucket, key] => {
            let data = match aws.s3.get(bucket, key).await {
                Ok(data) => data,
                Err(e) if S3::service_error(&e).is_some_and(|se| se.is_not_found()) => {
                    return Err(anyhow!("no object {key} in bucket {bucket}"));
                }
                Err(e) => return Err(e),
            };
            std::io::stdout().write_all(&data)?;
        }
        ["ls", bucket, prefix @ ..] => {
            let prefix = prefix.first().unwrap_or(&"");
            for key in aws.s3.list(bucket, prefix, ListObjects::default()).await? {
                println!("{key}");
            }
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}
