//! Rule configuration
//!
//! Rules arrive as loosely typed property bags (`RuleConfig`) and are
//! compiled into typed [`Rule`]s before matching. A rule that fails to compile
//! is excluded from the tick with a configuration warning; the others run.

use crate::error::ConnectorError;
use crate::records::TriggerKind;
use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

/// Event type served by this connector.
pub const EVM_EVENT_TYPE: &str = "evm";

/// Decimals assumed when a rule sets `minAmount` without `decimals`.
pub const DEFAULT_DECIMALS: u8 = 18;

/// A rule as configured by the rule-editing tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub id: u64,
    #[serde(default = "default_event_type")]
    pub event_type: String,
    /// Trigger kind: `send`, `receive` or `hold`
    pub trigger: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// `contractAddress`, `networkId`, and optionally `minAmount`,
    /// `decimals`, `targetAddress`, `duration` (ms).
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

fn default_event_type() -> String {
    EVM_EVENT_TYPE.to_string()
}

fn default_enabled() -> bool {
    true
}

impl RuleConfig {
    /// A property as a trimmed string. Numbers are accepted too; empty
    /// strings and nulls count as absent.
    fn prop(&self, name: &str) -> Option<String> {
        match self.properties.get(name)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn required(&self, name: &str) -> Result<String, ConnectorError> {
        self.prop(name).ok_or_else(|| {
            ConnectorError::Configuration(format!("rule {} is missing '{}'", self.id, name))
        })
    }

    fn invalid(&self, name: &str, detail: impl std::fmt::Display) -> ConnectorError {
        ConnectorError::Configuration(format!("rule {} has an invalid '{}': {}", self.id, name, detail))
    }
}

/// A compiled rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: u64,
    pub contract: Address,
    pub network_id: u64,
    pub kind: TriggerKind,
    /// Minimum amount in base units (already scaled by `10^decimals`)
    pub min_amount: Option<U256>,
    pub target: Option<Address>,
    /// Minimum holding period in milliseconds (hold rules)
    pub hold_duration_ms: u64,
}

impl Rule {
    pub fn from_config(config: &RuleConfig) -> Result<Self, ConnectorError> {
        let kind = TriggerKind::from_str(&config.trigger).map_err(|e| config.invalid("trigger", e))?;

        let contract_str = config.required("contractAddress")?;
        let contract =
            Address::from_str(&contract_str).map_err(|e| config.invalid("contractAddress", e))?;

        let network_str = config.required("networkId")?;
        let network_id = network_str
            .parse::<u64>()
            .map_err(|e| config.invalid("networkId", e))?;

        let decimals = match config.prop("decimals") {
            Some(d) => d.parse::<u8>().map_err(|e| config.invalid("decimals", e))?,
            None => DEFAULT_DECIMALS,
        };
        let min_amount = match config.prop("minAmount") {
            Some(m) => Some(scale_amount(&m, decimals).map_err(|e| config.invalid("minAmount", e))?),
            None => None,
        };

        let target = match config.prop("targetAddress") {
            Some(t) => Some(Address::from_str(&t).map_err(|e| config.invalid("targetAddress", e))?),
            None => None,
        };

        let hold_duration_ms = match config.prop("duration") {
            Some(d) => d.parse::<u64>().map_err(|e| config.invalid("duration", e))?,
            None => 0,
        };

        Ok(Self {
            id: config.id,
            contract,
            network_id,
            kind,
            min_amount,
            target,
            hold_duration_ms,
        })
    }
}

/// Scale a decimal amount such as `"5"` or `"1.25"` by `10^decimals`.
pub fn scale_amount(amount: &str, decimals: u8) -> Result<U256, String> {
    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(format!("'{}' is not a number", amount));
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(format!("'{}' is not a non-negative decimal number", amount));
    }
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.len() > decimals as usize {
        return Err(format!(
            "'{}' has more fractional digits than the token's {} decimals",
            amount, decimals
        ));
    }

    let mut digits = String::with_capacity(int_part.len() + decimals as usize);
    digits.push_str(int_part);
    digits.push_str(frac_part);
    digits.extend(std::iter::repeat('0').take(decimals as usize - frac_part.len()));

    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10).map_err(|e| format!("'{}' is out of range: {}", amount, e))
}

/// Compile rule configs, dropping (and logging) the ones that do not compile.
///
/// Disabled rules and rules of other event types are skipped silently. A
/// repeated rule id keeps its first definition.
pub fn compile_rules(configs: &[RuleConfig]) -> Vec<Rule> {
    let mut ids = HashSet::new();
    let mut rules = Vec::new();
    for config in configs {
        if !config.enabled || config.event_type != EVM_EVENT_TYPE {
            continue;
        }
        match Rule::from_config(config) {
            Ok(rule) => {
                if !ids.insert(rule.id) {
                    tracing::warn!(rule_id = rule.id, "Duplicate rule id, keeping the first definition");
                    continue;
                }
                rules.push(rule);
            }
            Err(e) => tracing::warn!(rule_id = config.id, "Excluding rule: {}", e),
        }
    }
    rules
}

/// Yields the currently enabled rule configurations.
pub trait RuleSource: Send + Sync {
    fn active_rules(&self, event_type: &str) -> Result<Vec<RuleConfig>>;
}

/// Rules kept in a JSON file (an array of [`RuleConfig`]).
///
/// The file is read on every call so that edits apply on the next tick.
pub struct FileRuleSource {
    path: PathBuf,
}

impl FileRuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RuleSource for FileRuleSource {
    fn active_rules(&self, event_type: &str) -> Result<Vec<RuleConfig>> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read rules file: {:?}", self.path))?;
        let configs: Vec<RuleConfig> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse rules file: {:?}", self.path))?;
        Ok(configs
            .into_iter()
            .filter(|c| c.enabled && c.event_type == event_type)
            .collect())
    }
}

impl RuleSource for Vec<RuleConfig> {
    fn active_rules(&self, event_type: &str) -> Result<Vec<RuleConfig>> {
        Ok(self
            .iter()
            .filter(|c| c.enabled && c.event_type == event_type)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config(trigger: &str, properties: Value) -> RuleConfig {
        serde_json::from_value(json!({
            "id": 1,
            "trigger": trigger,
            "properties": properties,
        }))
        .unwrap()
    }

    #[test]
    fn test_scale_amount() {
        assert_eq!(scale_amount("5", 18).unwrap(), U256::from(5_000_000_000_000_000_000u128));
        assert_eq!(scale_amount("1.5", 6).unwrap(), U256::from(1_500_000u64));
        assert_eq!(scale_amount("0.000001", 6).unwrap(), U256::from(1u64));
        assert_eq!(scale_amount("2.50", 1).unwrap(), U256::from(25u64));
        assert_eq!(scale_amount("0", 18).unwrap(), U256::ZERO);
        assert_eq!(scale_amount("7", 0).unwrap(), U256::from(7u64));
        assert!(scale_amount("0.0000001", 6).is_err());
        assert!(scale_amount("-1", 18).is_err());
        assert!(scale_amount("1e18", 18).is_err());
        assert!(scale_amount(".", 18).is_err());
        assert!(scale_amount("1", 200).is_err());
    }

    #[test]
    fn test_rule_from_config() {
        let rule = Rule::from_config(&config(
            "sendToken",
            json!({
                "contractAddress": "0x334D85047DA64738C065D36E10B2ADEB965000D0",
                "networkId": "137",
                "minAmount": "5",
                "targetAddress": "0x3c44cdddb6a900fa2b585dd299e03d12fa4293bc",
            }),
        ))
        .unwrap();
        assert_eq!(rule.kind, TriggerKind::Send);
        assert_eq!(rule.contract, address!("334d85047da64738c065d36e10b2adeb965000d0"));
        assert_eq!(rule.network_id, 137);
        // decimals default to 18
        assert_eq!(rule.min_amount, Some(U256::from(5_000_000_000_000_000_000u128)));
        assert_eq!(rule.target, Some(address!("3c44cdddb6a900fa2b585dd299e03d12fa4293bc")));
        assert_eq!(rule.hold_duration_ms, 0);
    }

    #[test]
    fn test_numeric_properties_are_accepted() {
        let rule = Rule::from_config(&config(
            "hold",
            json!({
                "contractAddress": "0x334d85047da64738c065d36e10b2adeb965000d0",
                "networkId": 1,
                "decimals": 6,
                "minAmount": "",
                "duration": 50000,
            }),
        ))
        .unwrap();
        assert_eq!(rule.network_id, 1);
        assert_eq!(rule.min_amount, None);
        assert_eq!(rule.hold_duration_ms, 50_000);
    }

    #[test]
    fn test_missing_contract_is_configuration_error() {
        let err = Rule::from_config(&config("receive", json!({ "networkId": "1" }))).unwrap_err();
        match err {
            ConnectorError::Configuration(msg) => assert!(msg.contains("contractAddress")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_compile_rules_excludes_bad_rules() {
        let good = config(
            "receive",
            json!({ "contractAddress": "0x334d85047da64738c065d36e10b2adeb965000d0", "networkId": "1" }),
        );
        let mut bad = good.clone();
        bad.id = 2;
        bad.trigger = "mint".into();
        let mut disabled = good.clone();
        disabled.id = 3;
        disabled.enabled = false;
        let duplicate = good.clone();

        let rules = compile_rules(&[good, bad, disabled, duplicate]);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, 1);
    }

    #[test]
    fn test_file_rule_source_filters_event_type() {
        let mut file = NamedTempFile::new().unwrap();
        let rules = json!([
            { "id": 1, "trigger": "send", "properties": {} },
            { "id": 2, "event_type": "twitter", "trigger": "send", "properties": {} },
            { "id": 3, "trigger": "hold", "enabled": false, "properties": {} },
        ]);
        write!(file, "{}", rules).unwrap();
        file.flush().unwrap();

        let source = FileRuleSource::new(file.path());
        let active = source.active_rules(EVM_EVENT_TYPE).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 1);
    }

    #[test]
    fn test_file_rule_source_reports_bad_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        file.flush().unwrap();
        assert!(FileRuleSource::new(file.path()).active_rules(EVM_EVENT_TYPE).is_err());
    }
}
