//! `Manual` strategy: no I/O, matcher values are regexes applied to the URL
//! itself. Because its whole semantics is URL matching, the ignore list is
//! not consulted here.

use super::{CheckError, HealthCheckCondition, StrategyChecker, UrlValidity};
use crate::checker::cache::ResponseCache;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

pub struct ManualChecker;

#[async_trait]
impl StrategyChecker for ManualChecker {
    fn valid_condition(&self, condition: &mut HealthCheckCondition) -> Result<(), CheckError> {
        condition.matchers.retain(|m| m.match_type == "=" || m.match_type == "!=");
        if condition.matchers.is_empty() {
            return Err(CheckError::InvalidCondition("invalid or empty matchers".to_string()));
        }
        Ok(())
    }

    async fn check(
        &self,
        _chain_id: &str,
        urls: &[String],
        condition: &HealthCheckCondition,
        _cache: &Arc<ResponseCache>,
    ) -> Result<UrlValidity, CheckError> {
        let mut patterns = Vec::with_capacity(condition.matchers.len());
        for matcher in &condition.matchers {
            let re = Regex::new(&matcher.value)
                .map_err(|e| CheckError::InvalidCondition(format!("bad matcher regex: {e}")))?;
            patterns.push((re, matcher.match_type == "!="));
        }

        let mut results = UrlValidity::with_capacity(urls.len());
        for url in urls {
            let mut valid = true;
            for (re, invert) in &patterns {
                valid = re.is_match(url) != *invert;
                if !valid {
                    debug!(url = %url, pattern = %re.as_str(), invert = invert, "url filtered");
                    break;
                }
            }
            results.insert(url.clone(), valid);
        }
        Ok(results)
    }
}
