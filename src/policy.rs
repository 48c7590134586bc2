//! Launch policy per backend.
//!
//! Acceptance rules live in a [`PolicyTable`] of [`BackendPolicy`] rows, so
//! supporting another miner is a matter of adding a row (in code or in the
//! config file) rather than new validation logic.

use crate::error::ConfigError;
use crate::parse::LaunchSpec;
use crate::telemetry::ParserKind;
use serde::Deserialize;
use std::path::PathBuf;

/// Acceptance rules and defaults for one miner backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendPolicy {
    pub id: String,
    pub parser: ParserKind,
    /// Flags that may carry the algorithm, e.g. `--algo` and `-a`.
    pub algo_flags: Vec<String>,
    /// Case-insensitive whitelist of algorithm values.
    pub allowed_algos: Vec<String>,
    pub pool_flags: Vec<String>,
    /// The pool value must contain at least one of these. Empty accepts any pool.
    #[serde(default)]
    pub pool_substrings: Vec<String>,
    pub wallet_flags: Vec<String>,
    pub wallet_prefix: String,
    /// Candidate executables relative to the miners directory, first existing wins.
    #[serde(default)]
    pub default_exe: Vec<PathBuf>,
}

/// A launch spec that passed its backend policy. Only obtainable from
/// [`PolicyTable::validate`].
#[derive(Debug, Clone)]
pub struct ValidatedLaunch {
    spec: LaunchSpec,
    policy: BackendPolicy,
    algo: String,
    pool: String,
    wallet: String,
}

impl ValidatedLaunch {
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub fn policy(&self) -> &BackendPolicy {
        &self.policy
    }

    pub fn algo(&self) -> &str {
        &self.algo
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn wallet(&self) -> &str {
        &self.wallet
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    rows: Vec<BackendPolicy>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn exe_candidates(dir: &str, name: &str) -> Vec<PathBuf> {
    let base = PathBuf::from(dir).join(name);
    vec![base.with_extension("exe"), base]
}

impl PolicyTable {
    pub fn new(rows: Vec<BackendPolicy>) -> Self {
        Self { rows }
    }

    /// Rows for the three miners shipped with installers.
    pub fn builtin() -> Self {
        let pools = strings(&["2miners.com", "ethermine.org", "f2pool.com", "herominers.com", "nanopool.org"]);
        Self::new(vec![
            BackendPolicy {
                id: "lolminer".into(),
                parser: ParserKind::Table,
                algo_flags: strings(&["--algo", "-a"]),
                allowed_algos: strings(&["ETCHASH", "ETHASH", "AUTOLYKOS2", "KASPA", "BEAM-III"]),
                pool_flags: strings(&["--pool", "-p"]),
                pool_substrings: pools.clone(),
                wallet_flags: strings(&["--user", "-u"]),
                wallet_prefix: "0x".into(),
                default_exe: exe_candidates("lolminer", "lolMiner"),
            },
            BackendPolicy {
                id: "trex".into(),
                parser: ParserKind::KeyValue,
                algo_flags: strings(&["-a", "--algo"]),
                allowed_algos: strings(&["etchash", "ethash", "kawpow", "autolykos2", "firopow"]),
                pool_flags: strings(&["-o", "--url"]),
                pool_substrings: pools.clone(),
                wallet_flags: strings(&["-u", "--user"]),
                wallet_prefix: "0x".into(),
                default_exe: exe_candidates("t-rex", "t-rex"),
            },
            BackendPolicy {
                id: "bzminer".into(),
                parser: ParserKind::PipeTable,
                algo_flags: strings(&["-a", "--algo"]),
                allowed_algos: strings(&["etchash", "ethash", "kawpow", "kaspa", "alph"]),
                pool_flags: strings(&["-p", "--pool"]),
                pool_substrings: pools,
                wallet_flags: strings(&["-w", "--wallet"]),
                wallet_prefix: "0x".into(),
                default_exe: exe_candidates("bzminer", "bzminer"),
            },
        ])
    }

    /// Adds rows, replacing any existing row with the same id.
    pub fn extend(&mut self, rows: impl IntoIterator<Item = BackendPolicy>) {
        for row in rows {
            match self.rows.iter_mut().find(|r| r.id == row.id) {
                Some(existing) => *existing = row,
                None => self.rows.push(row),
            }
        }
    }

    pub fn get(&self, backend: &str) -> Option<&BackendPolicy> {
        self.rows.iter().find(|r| r.id.eq_ignore_ascii_case(backend))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.id.as_str())
    }

    /// Checks `spec` against its backend row. Unknown backends are rejected.
    pub fn validate(&self, spec: &LaunchSpec) -> Result<ValidatedLaunch, ConfigError> {
        let policy = self.get(&spec.backend).ok_or_else(|| ConfigError::UnknownBackend {
            backend: spec.backend.clone(),
        })?;

        let algo = required_value(&spec.args, &policy.algo_flags)?;
        if !policy.allowed_algos.iter().any(|a| a.eq_ignore_ascii_case(algo)) {
            return Err(ConfigError::DisallowedAlgorithm {
                algo: algo.to_string(),
                allowed: policy.allowed_algos.join(", "),
            });
        }

        let pool = required_value(&spec.args, &policy.pool_flags)?;
        if !policy.pool_substrings.is_empty()
            && !policy.pool_substrings.iter().any(|s| pool.contains(s.as_str()))
        {
            return Err(ConfigError::PoolNotAllowed {
                pool: pool.to_string(),
                expected: policy.pool_substrings.join(", "),
            });
        }

        let wallet = required_value(&spec.args, &policy.wallet_flags)?;
        if !wallet.starts_with(policy.wallet_prefix.as_str()) {
            return Err(ConfigError::WalletPrefix {
                wallet: wallet.to_string(),
                prefix: policy.wallet_prefix.clone(),
            });
        }

        Ok(ValidatedLaunch {
            algo: algo.to_string(),
            pool: pool.to_string(),
            wallet: wallet.to_string(),
            spec: spec.clone(),
            policy: policy.clone(),
        })
    }
}

/// Finds the value of the first matching flag, as `--flag value` or `--flag=value`.
fn flag_value<'a>(args: &'a [String], flags: &[String]) -> Option<Result<&'a str, ConfigError>> {
    for (idx, arg) in args.iter().enumerate() {
        for flag in flags {
            if arg == flag {
                return Some(match args.get(idx + 1) {
                    Some(value) if !value.starts_with('-') => Ok(value.as_str()),
                    _ => Err(ConfigError::MissingValue { flag: flag.clone() }),
                });
            }
            if let Some(value) = arg.strip_prefix(flag.as_str()).and_then(|rest| rest.strip_prefix('=')) {
                return Some(if value.is_empty() {
                    Err(ConfigError::MissingValue { flag: flag.clone() })
                } else {
                    Ok(value)
                });
            }
        }
    }
    None
}

fn required_value<'a>(args: &'a [String], flags: &[String]) -> Result<&'a str, ConfigError> {
    flag_value(args, flags).unwrap_or_else(|| {
        Err(ConfigError::MissingFlag {
            flag: flags.first().cloned().unwrap_or_default(),
        })
    })
}
