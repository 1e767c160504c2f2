use std::path::PathBuf;

use acme::{
    AccountKey, ChallengeSolver, ChallengeType, Directory, DirectoryUrl, OrderPolicy, Solvers,
};
use actix_files::Files;
use actix_web::{App, HttpServer};
use async_trait::async_trait;
use tokio::fs;

const PRIMARY_NAME: &str = "example.org";
const ALT_NAMES: &[&str] = &["www.example.org"];

/// Writes key authorizations into the directory served by the web server below.
struct Webroot {
    root: PathBuf,
}

#[async_trait]
impl ChallengeSolver for Webroot {
    fn name(&self) -> &str {
        "webroot"
    }

    async fn present(&self, identifier: &str, token: &str, proof: &str) -> eyre::Result<()> {
        log::info!("placing challenge file for {identifier}");
        fs::write(self.root.join(token), proof).await?;
        Ok(())
    }

    async fn cleanup(&self, _identifier: &str, token: &str, _proof: &str) -> eyre::Result<()> {
        fs::remove_file(self.root.join(token)).await?;
        Ok(())
    }
}

#[actix_web::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Use `DirectoryUrl::LetsEncrypt` for production uses.
    let url = DirectoryUrl::LetsEncryptStaging;

    fs::create_dir_all("acme-challenge").await?;

    // Create temporary Actix Web server for ACME challenge.
    let srv = HttpServer::new(|| {
        App::new().service(Files::new("/.well-known/acme-challenge", "acme-challenge"))
    })
    .bind(("0.0.0.0", 80))?
    .shutdown_timeout(0)
    .run();

    let srv_handle = srv.handle();
    let srv_task = actix_web::rt::spawn(srv);

    // Create a directory entrypoint.
    let dir = Directory::fetch(url).await?;

    // Your contact addresses, note the `mailto:`
    let contact = vec!["mailto:foo@bar.com".to_owned()];

    // Generate a key and register an account with your ACME provider. You should write the key
    // to disk and use `Directory::lookup_account` afterwards.
    let acc = dir
        .register_account(AccountKey::generate(), Some(contact), true)
        .await?;

    // Order a new TLS certificate for the domains.
    let mut domains = vec![PRIMARY_NAME];
    domains.extend_from_slice(ALT_NAMES);
    let order = acc.new_order(&domains).await?;

    // Key for the certificate. You can provide your own instead.
    let cert_key = acme::create_p256_key();
    let csr = acme::create_csr(&cert_key, &order.domains())?;

    let solvers = Solvers::new().with(
        ChallengeType::Http01,
        Webroot {
            root: PathBuf::from("acme-challenge"),
        },
    );

    let bundle = acc
        .orchestrator(solvers)
        .with_policy(OrderPolicy::default().with_challenge_priority([ChallengeType::Http01]))
        .obtain_certificate(order, &csr)
        .await?;

    println!("{}", bundle.to_pem()?);
    log::info!("certificate expires in {} days", bundle.valid_days_left()?);

    // Stop temporary server for ACME challenge
    srv_handle.stop(true).await;
    srv_task.await??;

    // Delete acme-challenge dir
    fs::remove_dir_all("./acme-challenge").await?;

    Ok(())
}
