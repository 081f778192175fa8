//! Network policy engine (spec §4.3).
//!
//! Resolves a hostname or literal IP against the compiled
//! `[project_rules ++ global_rules]` sequence, default-deny. Compiled
//! policies are cached per project with a TTL and invalidated by the bus on
//! `project_network_policies`/`global_network_policies` events.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use ipnetwork::IpNetwork;
use moka::sync::Cache;
use trust_dns_resolver::TokioAsyncResolver;
use uuid::Uuid;

use crate::domain::{NetworkPolicyRule, PolicyAction, PolicyTargetType};
use crate::error::{Error, Result};
use crate::metadata_store::MetadataStore;

/// One rule, pre-parsed into a fast-matchable target.
#[derive(Debug, Clone)]
enum CompiledTarget {
    Ip(IpAddr),
    Cidr(IpNetwork),
    Domain(String),
}

#[derive(Debug, Clone)]
struct CompiledRule {
    action: PolicyAction,
    priority: i32,
    target: CompiledTarget,
}

/// `[project_rules ++ global_rules]`, ordered ascending by priority within
/// each half, plus the implicit default-deny.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    rules: Vec<CompiledRule>,
}

/// Why a connection attempt was rejected, distinguishing a policy match from
/// DNS failure (spec §8 boundary behavior: "fail fast, `policy_denied` if any
/// resolved IP hits a deny, else a `dns` error").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    Denied { rule_description: Option<String> },
}

impl CompiledPolicy {
    fn compile(project_rules: &[NetworkPolicyRule], global_rules: &[NetworkPolicyRule]) -> Self {
        let compile_one = |rule: &NetworkPolicyRule| -> Option<CompiledRule> {
            let target = match rule.target_type() {
                PolicyTargetType::Ip => CompiledTarget::Ip(rule.target_value.parse().ok()?),
                PolicyTargetType::Cidr => CompiledTarget::Cidr(rule.target_value.parse().ok()?),
                PolicyTargetType::Domain => CompiledTarget::Domain(rule.target_value.to_lowercase()),
            };
            Some(CompiledRule {
                action: rule.action(),
                priority: rule.priority,
                target,
            })
        };

        let mut rules: Vec<CompiledRule> = Vec::new();
        rules.extend(project_rules.iter().filter_map(compile_one));
        rules.extend(global_rules.iter().filter_map(compile_one));
        Self { rules }
    }

    fn matches_domain(rule_domain: &str, host: &str) -> bool {
        if let Some(suffix) = rule_domain.strip_prefix("*.") {
            // `*.example.com` matches any label or deeper suffix of
            // `example.com`, but not the bare apex itself — the apex
            // matches only if a literal `example.com` rule also exists
            // (spec §4.3), which is handled by the `else` branch below as
            // its own, separately-compiled rule.
            host.ends_with(&format!(".{suffix}"))
        } else {
            host == rule_domain
        }
    }

    /// First matching rule wins; ties broken by ascending priority (already
    /// the vector's sort order within each half).
    fn decide_ip(&self, ip: IpAddr) -> PolicyDecision {
        let mut matched: Option<&CompiledRule> = None;
        for rule in &self.rules {
            let hit = match &rule.target {
                CompiledTarget::Ip(target_ip) => *target_ip == ip,
                CompiledTarget::Cidr(net) => net.contains(ip),
                CompiledTarget::Domain(_) => false,
            };
            if hit {
                match matched {
                    Some(existing) if existing.priority <= rule.priority => {}
                    _ => matched = Some(rule),
                }
                break;
            }
        }
        match matched {
            Some(rule) if rule.action == PolicyAction::Allow => PolicyDecision::Allowed,
            Some(_) => PolicyDecision::Denied { rule_description: None },
            None => PolicyDecision::Denied { rule_description: None },
        }
    }

    fn decide_domain(&self, host: &str) -> Option<PolicyDecision> {
        let host = host.to_lowercase();
        for rule in &self.rules {
            if let CompiledTarget::Domain(rule_domain) = &rule.target {
                if Self::matches_domain(rule_domain, &host) {
                    return Some(match rule.action {
                        PolicyAction::Allow => PolicyDecision::Allowed,
                        PolicyAction::Deny => PolicyDecision::Denied { rule_description: None },
                    });
                }
            }
        }
        None
    }
}

/// Per-project compiled-policy cache plus the DNS resolver used to turn a
/// hostname into the address set every resolved IP must clear.
pub struct NetworkPolicyEngine {
    store: Arc<dyn MetadataStore>,
    cache: Cache<Option<Uuid>, Arc<CompiledPolicy>>,
    resolver: TokioAsyncResolver,
}

impl NetworkPolicyEngine {
    pub fn new(store: Arc<dyn MetadataStore>, cache_ttl: Duration) -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::Infrastructure(format!("failed to initialize DNS resolver: {e}")))?;

        Ok(Self {
            store,
            cache: Cache::builder().time_to_live(cache_ttl).build(),
            resolver,
        })
    }

    /// Compile (or fetch from cache) the effective policy for a project.
    /// `project_id = None` compiles the global-only policy (used by
    /// system-level calls that have no owning project).
    pub async fn compiled_policy(&self, project_id: Option<Uuid>) -> Result<Arc<CompiledPolicy>> {
        if let Some(cached) = self.cache.get(&project_id) {
            return Ok(cached);
        }

        let project_rules = if let Some(pid) = project_id {
            self.store.get_network_policies(pid).await?
        } else {
            Vec::new()
        };
        let global_rules = self.store.get_global_network_policies().await?;

        let compiled = Arc::new(CompiledPolicy::compile(&project_rules, &global_rules));
        self.cache.insert(project_id, compiled.clone());
        Ok(compiled)
    }

    /// Flush one project's cached policy (`project_network_policies` bus
    /// event).
    pub fn invalidate_project(&self, project_id: Uuid) {
        self.cache.invalidate(&Some(project_id));
    }

    /// Flush every cached policy (`global_network_policies` bus event, or a
    /// bus reconnect).
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Resolve `host` to its A/AAAA records and check every one against the
    /// compiled policy; the attempt is allowed only if every resolved
    /// address clears the policy (spec §4.3: "allowed only if the match
    /// against the *same* effective rule permits; any mismatch or deny
    /// stops the attempt").
    pub async fn check_outbound(&self, project_id: Option<Uuid>, host: &str) -> Result<()> {
        let policy = self.compiled_policy(project_id).await?;

        if let Ok(literal_ip) = host.parse::<IpAddr>() {
            return self.enforce_decision(policy.decide_ip(literal_ip));
        }

        if let Some(decision) = policy.decide_domain(host) {
            // A literal domain rule short-circuits DNS resolution entirely —
            // the rule applies regardless of which address the name
            // currently resolves to.
            return self.enforce_decision(decision);
        }

        let response = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| Error::PolicyDenied(format!("dns resolution failed for {host}: {e}")))?;

        let mut any_resolved = false;
        for ip in response.iter() {
            any_resolved = true;
            self.enforce_decision(policy.decide_ip(ip))?;
        }

        if !any_resolved {
            return Err(Error::PolicyDenied(format!("no addresses resolved for {host}")));
        }

        Ok(())
    }

    fn enforce_decision(&self, decision: PolicyDecision) -> Result<()> {
        match decision {
            PolicyDecision::Allowed => Ok(()),
            PolicyDecision::Denied { rule_description } => Err(Error::PolicyDenied(
                rule_description.unwrap_or_else(|| "denied by network policy".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NetworkPolicyRule;

    fn rule(priority: i32, action: &str, target_type: &str, value: &str) -> NetworkPolicyRule {
        NetworkPolicyRule {
            id: Uuid::new_v4(),
            project_id: None,
            priority,
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_value: value.to_string(),
            description: None,
        }
    }

    #[test]
    fn test_cidr_deny_then_allow_all() {
        let project = vec![
            rule(1, "deny", "cidr", "10.0.0.0/8"),
            rule(2, "allow", "cidr", "0.0.0.0/0"),
        ];
        let compiled = CompiledPolicy::compile(&project, &[]);

        assert_eq!(
            compiled.decide_ip("10.1.2.3".parse().unwrap()),
            PolicyDecision::Denied { rule_description: None }
        );
        assert_eq!(
            compiled.decide_ip("8.8.8.8".parse().unwrap()),
            PolicyDecision::Allowed
        );
    }

    #[test]
    fn test_default_deny_when_no_rule_matches() {
        let compiled = CompiledPolicy::compile(&[], &[]);
        assert_eq!(
            compiled.decide_ip("1.2.3.4".parse().unwrap()),
            PolicyDecision::Denied { rule_description: None }
        );
    }

    #[test]
    fn test_domain_wildcard_suffix() {
        assert!(CompiledPolicy::matches_domain("*.example.com", "api.example.com"));
        assert!(CompiledPolicy::matches_domain("*.example.com", "a.b.example.com"));
        // The wildcard alone does not cover the bare apex; that requires a
        // separate literal rule (spec §4.3).
        assert!(!CompiledPolicy::matches_domain("*.example.com", "example.com"));
        assert!(!CompiledPolicy::matches_domain("*.example.com", "notexample.com"));
        assert!(CompiledPolicy::matches_domain("example.com", "example.com"));
        assert!(!CompiledPolicy::matches_domain("example.com", "api.example.com"));
    }

    #[test]
    fn test_project_rules_take_priority_over_global() {
        let project = vec![rule(5, "allow", "cidr", "10.0.0.0/8")];
        let global = vec![rule(1, "deny", "cidr", "10.0.0.0/8")];
        let compiled = CompiledPolicy::compile(&project, &global);
        // project half is placed first regardless of its own priority value
        assert_eq!(
            compiled.decide_ip("10.1.1.1".parse().unwrap()),
            PolicyDecision::Allowed
        );
    }
}
