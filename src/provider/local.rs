//! In-process provider that fabricates attributes instead of calling a cloud.
//!
//! Every attribute is derived from a blake3 hash of the stack id, the logical
//! id and a revision counter, so repeated runs report the same values and a
//! replacement reports new ones.

use anyhow::{Result, bail};
use std::collections::BTreeMap;
use topology::{NodeRequest, Outputs, Provider, ResourceKind, Value};

/// Password length when a secret does not set `password_length`
pub const DEFAULT_PASSWORD_LENGTH: usize = 32;

/// Upper bound on `password_length`
pub const MAX_PASSWORD_LENGTH: i64 = 4096;

#[derive(Debug, Default)]
pub struct LocalProvider;

impl LocalProvider {
    pub fn new() -> Self {
        Self
    }

    fn materialize(&self, request: &NodeRequest<'_>, revision: i64) -> Result<Outputs> {
        let short = short_hash(request, revision);
        let kind = request.kind;
        let id = format!("{}-{}", kind.as_str().replace('_', ""), short);

        let mut outputs = Outputs::new();
        outputs.insert(
            "arn".into(),
            Value::from(format!(
                "arn:local:{}::{}/{}/{}",
                kind, request.stack, request.logical_id, short
            )),
        );
        outputs.insert("id".into(), Value::from(id));
        outputs.insert("revision".into(), Value::from(revision));

        let name = |key: &str| {
            request
                .properties
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}-{}", request.stack, request.logical_id))
        };

        match kind {
            ResourceKind::Network => {
                if let Some(cidr) = request.properties.get("cidr") {
                    outputs.insert("cidr".into(), cidr.clone());
                }
            }
            ResourceKind::SecurityGroup => {
                outputs.insert("group_id".into(), Value::from(format!("sg-{short}")));
            }
            ResourceKind::Database => {
                let identifier = name("instance_identifier").to_lowercase();
                outputs.insert(
                    "endpoint".into(),
                    Value::from(format!("{identifier}.{short}.db.local")),
                );
                outputs.insert("port".into(), Value::from(database_port(request)));
            }
            ResourceKind::LoadBalancer => {
                let lb = name("load_balancer_name").to_lowercase();
                outputs.insert(
                    "dns_name".into(),
                    Value::from(format!("{lb}-{short}.elb.local")),
                );
            }
            ResourceKind::Secret => {
                outputs.insert("secret_name".into(), Value::from(name("secret_name")));
                outputs.insert(
                    "secret_string".into(),
                    secret_string(request, revision)?,
                );
            }
            _ => {}
        }

        Ok(outputs)
    }
}

impl Provider for LocalProvider {
    fn create(&self, request: &NodeRequest<'_>) -> Result<Outputs> {
        log::info!("local: create {} {}", request.kind, request.logical_id);
        self.materialize(request, 1)
    }

    fn update(&self, request: &NodeRequest<'_>) -> Result<Outputs> {
        log::info!("local: update {} {}", request.kind, request.logical_id);
        self.materialize(request, prior_revision(request).max(1))
    }

    fn replace(&self, request: &NodeRequest<'_>) -> Result<Outputs> {
        log::info!("local: replace {} {}", request.kind, request.logical_id);
        self.materialize(request, prior_revision(request) + 1)
    }

    fn delete(&self, request: &NodeRequest<'_>) -> Result<()> {
        log::info!("local: delete {} {}", request.kind, request.logical_id);
        Ok(())
    }
}

fn prior_revision(request: &NodeRequest<'_>) -> i64 {
    request
        .prior
        .and_then(|p| p.outputs.get("revision"))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

fn seed(request: &NodeRequest<'_>, revision: i64) -> blake3::Hasher {
    let mut hasher = blake3::Hasher::new();
    hasher.update(request.stack.as_bytes());
    hasher.update(b"/");
    hasher.update(request.logical_id.as_bytes());
    hasher.update(b"/");
    hasher.update(&revision.to_le_bytes());
    hasher
}

fn short_hash(request: &NodeRequest<'_>, revision: i64) -> String {
    let hash = seed(request, revision).finalize();
    hash.to_hex().as_str()[..12].to_string()
}

fn database_port(request: &NodeRequest<'_>) -> i64 {
    if let Some(port) = request.properties.get("port").and_then(Value::as_i64) {
        return port;
    }
    match request.properties.get("engine").and_then(Value::as_str) {
        Some(engine) if engine.starts_with("mysql") || engine.starts_with("mariadb") => 3306,
        Some(engine) if engine.starts_with("sqlserver") => 1433,
        _ => 5432,
    }
}

/// Generate a password from printable ASCII minus `exclude`
pub fn generate_password(seed: &[u8], length: usize, exclude: &str) -> Result<String> {
    let alphabet: Vec<char> = (b'!'..=b'~')
        .map(char::from)
        .filter(|c| !exclude.contains(*c))
        .collect();
    if alphabet.is_empty() {
        bail!("exclude_characters leaves no characters to generate a password from");
    }

    let mut bytes = vec![0u8; length];
    blake3::Hasher::new()
        .update(b"password/")
        .update(seed)
        .finalize_xof()
        .fill(&mut bytes);

    Ok(bytes
        .iter()
        .map(|b| alphabet[*b as usize % alphabet.len()])
        .collect())
}

/// Build the secret value: the template object with the generated key set,
/// or the bare password when no key is named.
fn secret_string(request: &NodeRequest<'_>, revision: i64) -> Result<Value> {
    let props = request.properties;
    let length = match props.get("password_length").and_then(Value::as_i64) {
        Some(n) if (1..=MAX_PASSWORD_LENGTH).contains(&n) => n as usize,
        Some(n) => bail!("password_length must be between 1 and {MAX_PASSWORD_LENGTH}, got {n}"),
        None => DEFAULT_PASSWORD_LENGTH,
    };
    let exclude = props
        .get("exclude_characters")
        .and_then(Value::as_str)
        .unwrap_or("");

    let digest = seed(request, revision).finalize();
    let password = generate_password(digest.as_bytes(), length, exclude)?;

    let Some(key) = props.get("generate_string_key").and_then(Value::as_str) else {
        return Ok(Value::from(password));
    };

    let mut object: BTreeMap<String, Value> = match props.get("secret_string_template") {
        None => BTreeMap::new(),
        Some(Value::Map(map)) => map.clone(),
        Some(Value::String(text)) => serde_json::from_str(text).map_err(|e| {
            anyhow::anyhow!("secret_string_template is not a JSON object: {e}")
        })?,
        Some(other) => bail!(
            "secret_string_template must be an object, got {}",
            other.render()
        ),
    };
    object.insert(key.to_string(), Value::from(password));
    Ok(Value::Map(object))
}
