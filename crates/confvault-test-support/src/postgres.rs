//! Disposable `PostgreSQL` databases for integration tests.
//!
//! A database is carved out of an existing server named by
//! `CONFVAULT_TEST_DATABASE_URL`, or out of a throwaway server spawned from the
//! local `initdb`/`postgres` binaries. Either way the database is dropped when
//! the handle goes out of scope.

use std::env;
use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use postgres::NoTls;
use url::Url;

/// Environment variable naming an existing server to create test databases on.
pub const DATABASE_URL_ENV: &str = "CONFVAULT_TEST_DATABASE_URL";

const READY_ATTEMPTS: usize = 30;
const READY_INTERVAL: Duration = Duration::from_millis(200);

/// Handle to a scratch database; dropping it removes the database.
pub struct TestDatabase {
    url: String,
    admin_url: String,
    name: String,
    server: Option<LocalServer>,
}

impl TestDatabase {
    /// Connection string for the scratch database.
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.url
    }

    /// Name of the scratch database.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let statement = format!("DROP DATABASE IF EXISTS \"{}\"", self.name);
        let _ = run_admin(&self.admin_url, statement);
        if let Some(server) = self.server.take() {
            server.stop();
        }
    }
}

struct LocalServer {
    process: Child,
    data_dir: PathBuf,
}

impl LocalServer {
    fn stop(mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
        let _ = fs::remove_dir_all(&self.data_dir);
    }
}

/// Create a scratch database.
///
/// Tests should treat an error as "no database available" and skip.
///
/// # Errors
///
/// Returns an error when no server URL is configured and the local
/// `PostgreSQL` binaries are missing or fail to start, or when the database
/// cannot be created.
pub fn start_postgres() -> Result<TestDatabase> {
    if let Ok(base) = env::var(DATABASE_URL_ENV) {
        return create_database(&base);
    }

    let (server, base) = spawn_local_server()?;
    match create_database(&base) {
        Ok(mut database) => {
            database.server = Some(server);
            Ok(database)
        }
        Err(err) => {
            server.stop();
            Err(err)
        }
    }
}

fn create_database(base: &str) -> Result<TestDatabase> {
    let parsed = Url::parse(base).context("invalid postgres connection url")?;
    let name = scratch_name();

    let mut target = parsed.clone();
    target.set_path(&format!("/{name}"));

    let mut maintenance = parsed.clone();
    maintenance.set_path("/postgres");
    let mut candidates = vec![maintenance.to_string()];
    if maintenance.path() != parsed.path() {
        candidates.push(parsed.to_string());
    }

    let mut last_error = None;
    for admin_url in candidates {
        match run_admin(&admin_url, format!("CREATE DATABASE \"{name}\"")) {
            Ok(()) => {
                return Ok(TestDatabase {
                    url: target.to_string(),
                    admin_url,
                    name,
                    server: None,
                });
            }
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow!("no admin connection available")))
}

// The sync client spins up its own runtime, so it must stay off the test's
// async executor thread.
fn run_admin(admin_url: &str, statement: String) -> Result<()> {
    let admin_url = admin_url.to_string();
    thread::spawn(move || -> Result<()> {
        let config = postgres::Config::from_str(&admin_url)?;
        let mut client = config.connect(NoTls)?;
        client
            .simple_query(&statement)
            .map(|_| ())
            .with_context(|| format!("failed to execute `{statement}`"))
    })
    .join()
    .unwrap_or_else(|_| Err(anyhow!("admin connection thread panicked")))
}

fn spawn_local_server() -> Result<(LocalServer, String)> {
    let initdb = find_binary("initdb")?;
    let postgres = find_binary("postgres")?;
    let pg_isready = find_binary("pg_isready")?;

    let port = free_port()?;
    let data_dir = env::temp_dir().join(format!("confvault-pg-{}", unique_suffix()));
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let data_arg = data_dir
        .to_str()
        .context("data dir contains non-utf8 characters")?
        .to_string();

    let status = Command::new(initdb)
        .args(["-D", &data_arg, "--username=postgres", "--auth=trust"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("failed to run initdb")?;
    if !status.success() {
        let _ = fs::remove_dir_all(&data_dir);
        bail!("initdb exited with failure status");
    }

    let process = Command::new(postgres)
        .args(["-D", &data_arg, "-p", &port.to_string(), "-h", "127.0.0.1"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to start postgres")?;
    let server = LocalServer { process, data_dir };

    if let Err(err) = wait_until_ready(&pg_isready, port) {
        server.stop();
        return Err(err);
    }
    Ok((server, format!("postgres://postgres@127.0.0.1:{port}/postgres")))
}

fn find_binary(name: &str) -> Result<PathBuf> {
    let from_path = env::var_os("PATH")
        .map_or_else(Vec::new, |paths| env::split_paths(&paths).collect::<Vec<_>>());
    let known = [
        "/usr/lib/postgresql/16/bin",
        "/opt/homebrew/opt/postgresql@16/bin",
        "/usr/local/opt/postgresql@16/bin",
    ];
    known
        .iter()
        .map(PathBuf::from)
        .chain(from_path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.exists())
        .ok_or_else(|| anyhow!("{name} binary is required for postgres tests"))
}

fn free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("failed to reserve port")?;
    Ok(listener
        .local_addr()
        .context("failed to read listener address")?
        .port())
}

fn wait_until_ready(pg_isready: &Path, port: u16) -> Result<()> {
    let port = port.to_string();
    for _ in 0..READY_ATTEMPTS {
        let ready = Command::new(pg_isready)
            .args(["-h", "127.0.0.1", "-p", &port, "-U", "postgres"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success());
        if ready {
            return Ok(());
        }
        thread::sleep(READY_INTERVAL);
    }
    bail!("postgres did not become ready in time")
}

fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}_{nanos}", std::process::id())
}

fn scratch_name() -> String {
    format!("confvault_test_{}", unique_suffix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_names_are_valid_identifiers() {
        let name = scratch_name();
        assert!(name.starts_with("confvault_test_"));
        assert!(
            name.chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(create_database("not a url").is_err());
    }
}
