use crate::config::{Config, ConfigKind, ConfigValue};
use crate::namespace::Namespace;
use snap_plugin_error::{PluginError, Result};
use snap_plugin_proto::v1;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Declares one config key accepted by a plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRule {
    key: String,
    kind: ConfigKind,
    required: bool,
    default: Option<ConfigValue>,
    minimum: Option<f64>,
    maximum: Option<f64>,
}

impl ConfigRule {
    pub fn new(key: impl Into<String>, kind: ConfigKind) -> Self {
        Self {
            key: key.into(),
            kind,
            required: false,
            default: None,
            minimum: None,
            maximum: None,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_default(mut self, default: impl Into<ConfigValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn with_maximum(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> ConfigKind {
        self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn default_value(&self) -> Option<&ConfigValue> {
        self.default.as_ref()
    }

    pub fn minimum(&self) -> Option<f64> {
        self.minimum
    }

    pub fn maximum(&self) -> Option<f64> {
        self.maximum
    }

    fn invalid(&self, reason: impl Into<String>) -> PluginError {
        PluginError::InvalidRule {
            key: self.key.clone(),
            reason: reason.into(),
        }
    }

    /// Rejects declarations that no config value could ever satisfy.
    fn check(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(self.invalid("empty key"));
        }

        if self.minimum.is_some_and(f64::is_nan) || self.maximum.is_some_and(f64::is_nan) {
            return Err(self.invalid("NaN bound"));
        }

        if self.is_bounded() && !self.kind.is_numeric() {
            return Err(self.invalid(format!("bounds on a {} rule", self.kind)));
        }

        if let (Some(min), Some(max)) = (self.minimum, self.maximum) {
            if min > max {
                return Err(self.invalid(format!("minimum {min} exceeds maximum {max}")));
            }
        }

        if let Some(default) = &self.default {
            if default.kind() != self.kind {
                return Err(self.invalid(format!(
                    "default {default} is a {} value, rule kind is {}",
                    default.kind(),
                    self.kind
                )));
            }
            self.check_value(default)
                .map_err(|e| self.invalid(format!("default {default} rejected: {e}")))?;
        }

        Ok(())
    }

    fn check_value(&self, value: &ConfigValue) -> Result<()> {
        if value.kind() != self.kind {
            return Err(PluginError::TypeMismatch {
                key: self.key.clone(),
                expected: self.kind.as_str(),
                actual: value.kind().as_str(),
            });
        }

        let out_of_range = match *value {
            ConfigValue::Int(v) => {
                self.minimum
                    .is_some_and(|min| cmp_int_to_bound(v, min).is_none_or(Ordering::is_lt))
                    || self
                        .maximum
                        .is_some_and(|max| cmp_int_to_bound(v, max).is_none_or(Ordering::is_gt))
            }
            ConfigValue::Float(v) => {
                (self.is_bounded() && !v.is_finite())
                    || self.minimum.is_some_and(|min| v < min)
                    || self.maximum.is_some_and(|max| v > max)
            }
            ConfigValue::String(_) | ConfigValue::Bool(_) => false,
        };

        if out_of_range {
            return Err(PluginError::OutOfRange {
                key: self.key.clone(),
                value: value.as_f64().unwrap_or(f64::NAN),
                minimum: self.minimum,
                maximum: self.maximum,
            });
        }

        Ok(())
    }

    fn is_bounded(&self) -> bool {
        self.minimum.is_some() || self.maximum.is_some()
    }

    fn to_wire(&self, prefix: &Namespace) -> v1::PolicyRule {
        v1::PolicyRule {
            namespace_prefix: prefix.to_string(),
            key: self.key.clone(),
            kind: v1::ConfigKind::from(self.kind) as i32,
            required: self.required,
            default_value: self.default.as_ref().map(v1::ConfigValue::from),
            minimum: self.minimum,
            maximum: self.maximum,
        }
    }
}

/// Orders an integer against a float bound without rounding the integer.
/// Returns `None` for a NaN bound.
fn cmp_int_to_bound(value: i64, bound: f64) -> Option<Ordering> {
    // 2^63, exactly representable
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;

    if bound.is_nan() {
        return None;
    }
    if bound >= LIMIT {
        return Some(Ordering::Less);
    }
    if bound < -LIMIT {
        return Some(Ordering::Greater);
    }

    let whole = bound.trunc();
    match value.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&(bound - whole)),
        ordering => Some(ordering),
    }
}

#[derive(Debug, Clone)]
struct Scope {
    prefix: Namespace,
    rules: Vec<ConfigRule>,
}

impl Scope {
    /// Static prefix elements must equal the namespace element at the same
    /// position; dynamic markers must sit on a dynamic namespace position.
    fn matches(&self, namespace: &Namespace) -> bool {
        self.prefix.len() <= namespace.len()
            && self
                .prefix
                .elements()
                .iter()
                .zip(namespace.elements())
                .all(|(marker, element)| {
                    if marker.is_dynamic() {
                        element.is_dynamic()
                    } else {
                        !element.is_dynamic() && marker.value() == element.value()
                    }
                })
    }
}

/// Config rules declared by a plugin, scoped by namespace prefix.
#[derive(Debug, Clone, Default)]
pub struct ConfigPolicy {
    scopes: Vec<Scope>,
}

impl ConfigPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `rule` under `prefix`. An empty prefix applies to every namespace.
    pub fn add_rule(&mut self, prefix: &Namespace, rule: ConfigRule) -> Result<&mut Self> {
        rule.check()?;

        let idx = match self.scopes.iter().position(|s| &s.prefix == prefix) {
            Some(idx) => idx,
            None => {
                self.scopes.push(Scope {
                    prefix: prefix.clone(),
                    rules: Vec::new(),
                });
                self.scopes.len() - 1
            }
        };

        let scope = &mut self.scopes[idx];
        if scope.rules.iter().any(|r| r.key == rule.key) {
            return Err(PluginError::DuplicateRule {
                prefix: prefix.to_string(),
                key: rule.key,
            });
        }

        scope.rules.push(rule);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.iter().all(|s| s.rules.is_empty())
    }

    /// Every rule with its prefix, in registration order.
    pub fn rules(&self) -> impl Iterator<Item = (&Namespace, &ConfigRule)> {
        self.scopes
            .iter()
            .flat_map(|s| s.rules.iter().map(move |r| (&s.prefix, r)))
    }

    /// Rules governing `namespace`, most specific prefix first.
    pub fn rules_for(&self, namespace: &Namespace) -> Vec<&ConfigRule> {
        let mut scopes: Vec<&Scope> = self.scopes.iter().filter(|s| s.matches(namespace)).collect();
        scopes.sort_by_key(|s| std::cmp::Reverse(s.prefix.len()));
        scopes.into_iter().flat_map(|s| s.rules.iter()).collect()
    }

    /// Checks `config` against every rule governing `namespace`.
    ///
    /// Each key is reported at most once. A present value is checked against
    /// all rules declaring its key, most specific first. An absent key is
    /// missing when some rule requires it and none supplies a default.
    /// All violations are collected into a single [`PluginError::Validation`].
    pub fn validate(&self, namespace: &Namespace, config: &Config) -> Result<()> {
        let rules = self.rules_for(namespace);
        let mut seen = HashSet::new();
        let mut violations = Vec::new();

        for rule in &rules {
            if !seen.insert(rule.key.as_str()) {
                continue;
            }
            let mut declared = rules.iter().filter(|r| r.key == rule.key);

            match config.get(&rule.key) {
                Some(value) => {
                    if let Some(e) = declared.find_map(|r| r.check_value(value).err()) {
                        violations.push(e);
                    }
                }
                None => {
                    let (required, defaulted) = declared.fold((false, false), |(req, def), r| {
                        (req || r.required, def || r.default.is_some())
                    });
                    if required && !defaulted {
                        violations.push(PluginError::MissingRequiredKey(rule.key.clone()));
                    }
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(PluginError::Validation(violations))
        }
    }

    /// Validates `config` and returns a copy with defaults filled in for absent keys.
    ///
    /// When several prefixes declare the same key, the default of the most
    /// specific one is used.
    pub fn resolve(&self, namespace: &Namespace, config: &Config) -> Result<Config> {
        self.validate(namespace, config)?;

        let mut resolved = config.clone();
        for rule in self.rules_for(namespace) {
            if let Some(default) = &rule.default {
                if !resolved.contains_key(&rule.key) {
                    resolved.set(rule.key.clone(), default.clone());
                }
            }
        }
        Ok(resolved)
    }

    /// Flattens the policy into the reply sent to the host, grouped by prefix.
    pub fn get_config_policy_reply(&self) -> v1::GetConfigPolicyReply {
        let mut scopes: Vec<&Scope> = self.scopes.iter().collect();
        scopes.sort_by_cached_key(|s| s.prefix.to_string());

        let rules = scopes
            .into_iter()
            .flat_map(|s| s.rules.iter().map(|r| r.to_wire(&s.prefix)))
            .collect();

        v1::GetConfigPolicyReply { rules }
    }
}
