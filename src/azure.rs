use std::io;
use std::process::{Output, Stdio};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{AppError, GatewayError, Result};
use crate::model::{Secret, SecretVersion, Vault};

const EXEC_BUSY_RETRY_ATTEMPTS: usize = 20;
const EXEC_BUSY_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Lookup and mutation operations the navigation layer needs from Key Vault.
///
/// Implementations never panic; every failure comes back as a `GatewayError`
/// and is logged at this boundary.
pub trait KeyVaultGateway: Send + Sync {
    fn list_vaults(&self) -> BoxFuture<'_, Result<Vec<Vault>>>;

    fn list_secrets<'a>(&'a self, vault: &'a str) -> BoxFuture<'a, Result<Vec<Secret>>>;

    fn list_versions<'a>(
        &'a self,
        vault: &'a str,
        secret: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SecretVersion>>>;

    /// `version: None` (or blank) reads the latest version.
    fn get_value<'a>(
        &'a self,
        vault: &'a str,
        secret: &'a str,
        version: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<String>>>;

    /// Creates the secret, or appends a new version when it already exists.
    fn set_secret<'a>(
        &'a self,
        vault: &'a str,
        secret: &'a str,
        value: &'a str,
        content_type: Option<&'a str>,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Gateway backed by the `az` command line tool.
///
/// Arguments are always passed as an argument vector; no shell is involved.
#[derive(Debug, Clone)]
pub struct AzCli {
    binary: String,
    timeout: Option<Duration>,
}

impl AzCli {
    pub fn new(binary: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// `az account set --subscription <name>`, run once before the UI starts.
    pub async fn set_subscription(&self, subscription: &str) -> Result<()> {
        require("subscription", subscription)?;
        let result = self
            .run(&["account", "set", "--subscription", subscription])
            .await
            .map(|_| ());
        logged("account set", result)
    }

    /// [`AzCli::set_subscription`] with the CLI's own complaint as the error.
    pub async fn switch_subscription(&self, subscription: &str) -> std::result::Result<(), AppError> {
        self.set_subscription(subscription).await.map_err(|e| {
            AppError::Subscription(match e {
                GatewayError::Exit { stderr, .. } if !stderr.is_empty() => stderr,
                other => other.to_string(),
            })
        })
    }

    /// Runs one CLI invocation and returns its standard output.
    async fn run(&self, args: &[&str]) -> Result<String> {
        // only the subcommand is logged, never names or values
        let subcommand = args[..args.len().min(3)].join(" ");
        debug!(binary = %self.binary, %subcommand, "invoking az");

        let output = self.output(args).await?;
        if !output.status.success() {
            return Err(GatewayError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|e| GatewayError::Parse(e.to_string()))
    }

    async fn output(&self, args: &[&str]) -> Result<Output> {
        let mut attempt = 0;
        loop {
            let mut command = Command::new(&self.binary);
            command
                .args(args)
                .args(["--output", "json"])
                .stdin(Stdio::null())
                .kill_on_drop(true);

            let outcome = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, command.output()).await {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(GatewayError::Timeout(limit)),
                },
                None => command.output().await,
            };

            match outcome {
                Ok(output) => return Ok(output),
                Err(err) if is_exec_busy(&err) && attempt + 1 < EXEC_BUSY_RETRY_ATTEMPTS => {
                    attempt += 1;
                    tokio::time::sleep(EXEC_BUSY_RETRY_DELAY).await;
                }
                Err(err) => {
                    return Err(GatewayError::Spawn {
                        binary: self.binary.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    async fn fetch_vaults(&self) -> Result<Vec<Vault>> {
        let stdout = self.run(&["keyvault", "list"]).await?;
        parse_vaults(&stdout)
    }

    async fn fetch_secrets(&self, vault: &str) -> Result<Vec<Secret>> {
        require("vault name", vault)?;
        let stdout = self
            .run(&["keyvault", "secret", "list", "--vault-name", vault])
            .await?;
        parse_secrets(&stdout)
    }

    async fn fetch_versions(&self, vault: &str, secret: &str) -> Result<Vec<SecretVersion>> {
        require("vault name", vault)?;
        require("secret name", secret)?;
        let stdout = self
            .run(&[
                "keyvault",
                "secret",
                "list-versions",
                "--vault-name",
                vault,
                "--name",
                secret,
            ])
            .await?;
        parse_versions(&stdout)
    }

    async fn fetch_value(
        &self,
        vault: &str,
        secret: &str,
        version: Option<&str>,
    ) -> Result<Option<String>> {
        require("vault name", vault)?;
        require("secret name", secret)?;
        let mut args = vec![
            "keyvault",
            "secret",
            "show",
            "--vault-name",
            vault,
            "--name",
            secret,
        ];
        if let Some(version) = version.filter(|v| !v.trim().is_empty()) {
            args.extend(["--version", version]);
        }
        let stdout = self.run(&args).await?;
        parse_value(&stdout)
    }

    async fn store_secret(
        &self,
        vault: &str,
        secret: &str,
        value: &str,
        content_type: Option<&str>,
    ) -> Result<()> {
        require("vault name", vault)?;
        require("secret name", secret)?;
        // `--value=` keeps values that begin with '-' from parsing as options
        let value_arg = format!("--value={value}");
        let mut args = vec![
            "keyvault",
            "secret",
            "set",
            "--vault-name",
            vault,
            "--name",
            secret,
            value_arg.as_str(),
        ];
        if let Some(content_type) = content_type.filter(|c| !c.trim().is_empty()) {
            args.extend(["--content-type", content_type]);
        }
        let stdout = self.run(&args).await?;
        if stdout.trim().is_empty() {
            return Err(GatewayError::EmptyResponse);
        }
        Ok(())
    }
}

impl KeyVaultGateway for AzCli {
    fn list_vaults(&self) -> BoxFuture<'_, Result<Vec<Vault>>> {
        async move { logged("keyvault list", self.fetch_vaults().await) }.boxed()
    }

    fn list_secrets<'a>(&'a self, vault: &'a str) -> BoxFuture<'a, Result<Vec<Secret>>> {
        async move { logged("keyvault secret list", self.fetch_secrets(vault).await) }.boxed()
    }

    fn list_versions<'a>(
        &'a self,
        vault: &'a str,
        secret: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SecretVersion>>> {
        async move {
            logged(
                "keyvault secret list-versions",
                self.fetch_versions(vault, secret).await,
            )
        }
        .boxed()
    }

    fn get_value<'a>(
        &'a self,
        vault: &'a str,
        secret: &'a str,
        version: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        async move {
            logged(
                "keyvault secret show",
                self.fetch_value(vault, secret, version).await,
            )
        }
        .boxed()
    }

    fn set_secret<'a>(
        &'a self,
        vault: &'a str,
        secret: &'a str,
        value: &'a str,
        content_type: Option<&'a str>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            logged(
                "keyvault secret set",
                self.store_secret(vault, secret, value, content_type).await,
            )
        }
        .boxed()
    }
}

fn logged<T>(operation: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        warn!(operation, error = %e, "az call failed");
    }
    result
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(())
}

fn is_exec_busy(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ExecutableFileBusy || err.raw_os_error() == Some(26)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultDto {
    name: Option<String>,
    resource_group: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AttributesDto {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    created: Option<OffsetDateTime>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    updated: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretDto {
    name: Option<String>,
    id: Option<String>,
    content_type: Option<String>,
    attributes: Option<AttributesDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionDto {
    id: Option<String>,
    content_type: Option<String>,
    attributes: Option<AttributesDto>,
}

#[derive(Debug, Deserialize)]
struct ShownSecretDto {
    value: Option<String>,
}

/// Unparseable timestamps are treated as absent rather than failing the record.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<OffsetDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| OffsetDateTime::parse(&s, &Rfc3339).ok()))
}

fn parse_list<T: DeserializeOwned>(stdout: &str) -> Result<Vec<T>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let items: Option<Vec<T>> = serde_json::from_str(stdout)?;
    Ok(items.unwrap_or_default())
}

fn parse_vaults(stdout: &str) -> Result<Vec<Vault>> {
    let dtos: Vec<VaultDto> = parse_list(stdout)?;
    Ok(dtos
        .into_iter()
        .map(|dto| {
            let id = dto.id.unwrap_or_default();
            Vault {
                name: dto.name.unwrap_or_default(),
                subscription: subscription_from_id(&id),
                resource_group: dto.resource_group.unwrap_or_default(),
                id,
            }
        })
        .collect())
}

fn parse_secrets(stdout: &str) -> Result<Vec<Secret>> {
    let dtos: Vec<SecretDto> = parse_list(stdout)?;
    Ok(dtos
        .into_iter()
        .map(|dto| {
            let attributes = dto.attributes.unwrap_or_default();
            Secret {
                name: dto.name.unwrap_or_default(),
                content_type: dto.content_type,
                enabled: attributes.enabled.unwrap_or(false),
                created: attributes.created,
                updated: attributes.updated,
                id: dto.id.unwrap_or_default(),
            }
        })
        .collect())
}

fn parse_versions(stdout: &str) -> Result<Vec<SecretVersion>> {
    let dtos: Vec<VersionDto> = parse_list(stdout)?;
    Ok(dtos
        .into_iter()
        .map(|dto| {
            let attributes = dto.attributes.unwrap_or_default();
            SecretVersion {
                version: version_from_id(dto.id.as_deref().unwrap_or_default()),
                enabled: attributes.enabled.unwrap_or(false),
                created: attributes.created,
                updated: attributes.updated,
                content_type: dto.content_type,
            }
        })
        .collect())
}

fn parse_value(stdout: &str) -> Result<Option<String>> {
    if stdout.trim().is_empty() {
        return Ok(None);
    }
    let shown: Option<ShownSecretDto> = serde_json::from_str(stdout)?;
    Ok(shown.and_then(|s| s.value))
}

fn subscription_from_id(id: &str) -> String {
    let parts: Vec<&str> = id.split('/').collect();
    parts
        .iter()
        .position(|part| *part == "subscriptions")
        .and_then(|idx| parts.get(idx + 1))
        .map(|sub| sub.to_string())
        .unwrap_or_default()
}

fn version_from_id(id: &str) -> String {
    id.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VAULTS_JSON: &str = r#"[
        {
            "id": "/subscriptions/1111-2222/resourceGroups/rg1/providers/Microsoft.KeyVault/vaults/kv1",
            "location": "westeurope",
            "name": "kv1",
            "resourceGroup": "rg1"
        },
        { "name": "kv2", "resourceGroup": "rg2" }
    ]"#;

    #[test]
    fn parses_vaults_and_extracts_subscription() {
        let vaults = parse_vaults(VAULTS_JSON).expect("vaults");
        assert_eq!(vaults.len(), 2);
        assert_eq!(vaults[0].name, "kv1");
        assert_eq!(vaults[0].resource_group, "rg1");
        assert_eq!(vaults[0].subscription, "1111-2222");
        assert_eq!(vaults[1].subscription, "");
        assert_eq!(vaults[1].id, "");
    }

    #[test]
    fn parses_secrets_with_lenient_attributes() {
        let json = r#"[
            {
                "id": "https://kv1.vault.azure.net/secrets/db-password",
                "name": "db-password",
                "contentType": "text/plain",
                "attributes": {
                    "enabled": true,
                    "created": "2024-03-01T10:15:00+00:00",
                    "updated": "not a date"
                }
            },
            { "name": "api-key", "attributes": null }
        ]"#;
        let secrets = parse_secrets(json).expect("secrets");
        assert_eq!(secrets[0].content_type.as_deref(), Some("text/plain"));
        assert!(secrets[0].enabled);
        assert_eq!(secrets[0].created.map(|t| t.year()), Some(2024));
        assert_eq!(secrets[0].updated, None);
        assert!(!secrets[1].enabled);
        assert_eq!(secrets[1].content_type, None);
    }

    #[test]
    fn version_id_is_trailing_segment() {
        let json = r#"[
            {
                "id": "https://kv1.vault.azure.net/secrets/db-password/0f1e2d3c4b5a69788796a5b4c3d2e1f0",
                "attributes": { "enabled": false, "updated": "2024-05-06T07:08:09Z" }
            }
        ]"#;
        let versions = parse_versions(json).expect("versions");
        assert_eq!(versions[0].version, "0f1e2d3c4b5a69788796a5b4c3d2e1f0");
        assert!(!versions[0].enabled);
        assert!(versions[0].updated.is_some());
        assert_eq!(version_from_id("https://kv/secrets/s/abc/"), "abc");
    }

    #[test]
    fn value_may_be_missing() {
        assert_eq!(parse_value(r#"{"value": "hunter2"}"#).unwrap(), Some("hunter2".into()));
        assert_eq!(parse_value(r#"{"contentType": null}"#).unwrap(), None);
        assert_eq!(parse_value("  \n").unwrap(), None);
    }

    #[test]
    fn blank_output_is_empty_and_garbage_is_a_parse_error() {
        assert!(parse_vaults("").unwrap().is_empty());
        assert!(parse_secrets("null").unwrap().is_empty());
        assert!(matches!(parse_vaults("ERROR: not logged in"), Err(GatewayError::Parse(_))));
        assert!(matches!(parse_versions(r#"{"id": 1}"#), Err(GatewayError::Parse(_))));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let cli = AzCli::new("/nonexistent/definitely-not-az", None);
        let err = cli.list_vaults().await.unwrap_err();
        assert!(matches!(err, GatewayError::Spawn { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn empty_names_never_reach_the_cli() {
        let cli = AzCli::new("/nonexistent/definitely-not-az", None);
        let err = cli.list_secrets("  ").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(_)));
    }

    #[cfg(unix)]
    mod subprocess {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        use super::*;

        fn fake_az(dir: &Path, body: &str) -> String {
            let path = dir.join("az");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        }

        #[tokio::test]
        async fn lists_vaults_from_cli_output() {
            let dir = tempfile::tempdir().unwrap();
            let body = format!("cat <<'JSON'\n{VAULTS_JSON}\nJSON");
            let cli = AzCli::new(fake_az(dir.path(), &body), None);

            let vaults = cli.list_vaults().await.unwrap();
            let names: Vec<_> = vaults.iter().map(|v| v.name.as_str()).collect();
            assert_eq!(names, ["kv1", "kv2"]);
        }

        #[tokio::test]
        async fn non_zero_exit_carries_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let cli = AzCli::new(fake_az(dir.path(), "echo 'Please run az login' >&2\nexit 3"), None);

            match cli.list_secrets("kv1").await {
                Err(GatewayError::Exit { stderr, .. }) => assert_eq!(stderr, "Please run az login"),
                other => panic!("expected exit error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn slow_cli_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let cli = AzCli::new(
                fake_az(dir.path(), "sleep 5"),
                Some(Duration::from_millis(200)),
            );

            let err = cli.list_vaults().await.unwrap_err();
            assert_eq!(err, GatewayError::Timeout(Duration::from_millis(200)));
        }

        #[tokio::test]
        async fn set_secret_passes_arguments_verbatim() {
            let dir = tempfile::tempdir().unwrap();
            let body = r#"for a in "$@"; do printf '%s\n' "$a"; done > "$(dirname "$0")/args.txt"
echo '{"id": "https://kv1.vault.azure.net/secrets/x/1"}'"#;
            let cli = AzCli::new(fake_az(dir.path(), body), None);

            let value = "p@ss\"; touch pwned; echo \"$(id)";
            cli.set_secret("kv1", "db-password", value, Some("text/plain"))
                .await
                .unwrap();

            let args = fs::read_to_string(dir.path().join("args.txt")).unwrap();
            let args: Vec<_> = args.lines().collect();
            assert_eq!(
                args,
                [
                    "keyvault",
                    "secret",
                    "set",
                    "--vault-name",
                    "kv1",
                    "--name",
                    "db-password",
                    "--value=p@ss\"; touch pwned; echo \"$(id)",
                    "--content-type",
                    "text/plain",
                    "--output",
                    "json",
                ]
            );
            assert!(!dir.path().join("pwned").exists());
        }

        #[tokio::test]
        async fn subscription_switch_runs_account_set() {
            let dir = tempfile::tempdir().unwrap();
            let body = r#"for a in "$@"; do printf '%s\n' "$a"; done > "$(dirname "$0")/args.txt"
echo '{}'"#;
            let cli = AzCli::new(fake_az(dir.path(), body), None);

            cli.switch_subscription("My Sub; rm -rf /").await.unwrap();

            let args = fs::read_to_string(dir.path().join("args.txt")).unwrap();
            let args: Vec<_> = args.lines().collect();
            assert_eq!(
                args,
                [
                    "account",
                    "set",
                    "--subscription",
                    "My Sub; rm -rf /",
                    "--output",
                    "json",
                ]
            );
        }

        #[tokio::test]
        async fn failed_subscription_switch_reports_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let body = "echo \"ERROR: The subscription 'nope' doesn't exist.\" >&2\nexit 1";
            let cli = AzCli::new(fake_az(dir.path(), body), None);

            let err = cli.switch_subscription("nope").await.unwrap_err();
            assert!(matches!(
                &err,
                AppError::Subscription(stderr) if stderr == "ERROR: The subscription 'nope' doesn't exist."
            ));
            assert_eq!(
                err.to_string(),
                "Failed to switch subscription: ERROR: The subscription 'nope' doesn't exist."
            );
        }

        #[tokio::test]
        async fn set_secret_with_empty_output_fails() {
            let dir = tempfile::tempdir().unwrap();
            let cli = AzCli::new(fake_az(dir.path(), "exit 0"), None);

            let err = cli.set_secret("kv1", "s", "v", None).await.unwrap_err();
            assert_eq!(err, GatewayError::EmptyResponse);
        }

        #[tokio::test]
        async fn show_passes_version_only_when_given() {
            let dir = tempfile::tempdir().unwrap();
            let body = r#"printf '%s ' "$@" > "$(dirname "$0")/args.txt"
echo '{"value": "s3cret"}'"#;
            let cli = AzCli::new(fake_az(dir.path(), body), None);

            let value = cli.get_value("kv1", "db", Some("abc123")).await.unwrap();
            assert_eq!(value.as_deref(), Some("s3cret"));
            let args = fs::read_to_string(dir.path().join("args.txt")).unwrap();
            assert!(args.contains("--version abc123"));

            cli.get_value("kv1", "db", None).await.unwrap();
            let args = fs::read_to_string(dir.path().join("args.txt")).unwrap();
            assert!(!args.contains("--version"));
        }
    }
}
