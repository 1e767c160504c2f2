use std::io;

use acme::{AccountKey, Directory, DirectoryUrl};
use tokio::fs;

const ACCOUNTS_DIR: &str = "./acme-accounts";

const CONTACT_EMAIL: Option<&str> = None;

#[actix_web::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    log::info!("ensuring accounts dir exists");
    fs::create_dir_all(ACCOUNTS_DIR).await?;

    log::info!("fetching LetsEncrypt directory");
    let dir = Directory::fetch(DirectoryUrl::LetsEncryptStaging).await?;

    let key_path = format!("{ACCOUNTS_DIR}/account.pem");

    log::info!("loading account key from disk");
    let key = match fs::read_to_string(&key_path).await {
        Ok(key_pem) => AccountKey::from_pem(&key_pem)?,

        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            log::info!("generating account key");
            let key = AccountKey::generate();

            log::info!("persisting account key to {key_path}");
            fs::write(&key_path, key.to_pem()?.as_bytes()).await?;

            key
        }

        Err(err) => return Err(err.into()),
    };

    let acc = match dir.lookup_account(key.clone()).await? {
        Some(acc) => {
            log::info!("found existing account");
            acc
        }
        None => {
            let contact = CONTACT_EMAIL.map(|email| vec![format!("mailto:{email}")]);

            log::info!("registering with ACME provider");
            dir.register_account(key, contact, true).await?
        }
    };

    log::info!("account URL: {}", acc.url());
    dbg!(acc.api_account());

    if std::env::args().any(|arg| arg == "--deactivate") {
        log::info!("deactivating account");
        acc.deactivate().await?;
        fs::remove_file(&key_path).await?;
    }

    Ok(())
}
