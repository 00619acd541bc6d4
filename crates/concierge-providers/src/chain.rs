//! Responder chain: keyword rules, then generative fallback, then a fixed
//! reply.

use async_trait::async_trait;
use concierge_core::{
    error::ConciergeError,
    phone::ConversationKey,
    traits::{KeywordRule, KeywordRuleSource, Provider, Responder},
};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ResponderChain {
    rules: Arc<dyn KeywordRuleSource>,
    provider: Option<Arc<dyn Provider>>,
    system_prompt: String,
    fallback_reply: String,
}

impl ResponderChain {
    pub fn new(
        rules: Arc<dyn KeywordRuleSource>,
        provider: Option<Arc<dyn Provider>>,
        system_prompt: String,
        fallback_reply: String,
    ) -> Self {
        Self {
            rules,
            provider,
            system_prompt,
            fallback_reply,
        }
    }
}

/// First rule whose keyword appears (case-insensitively) in `text`.
fn match_rule<'a>(rules: &'a [KeywordRule], text: &str) -> Option<&'a KeywordRule> {
    let lower = text.to_lowercase();
    rules.iter().find(|r| {
        let kw = r.keyword.trim().to_lowercase();
        !kw.is_empty() && lower.contains(&kw)
    })
}

#[async_trait]
impl Responder for ResponderChain {
    async fn respond(&self, text: &str, key: &ConversationKey) -> Result<String, ConciergeError> {
        match self.rules.keyword_rules().await {
            Ok(rules) => {
                if let Some(rule) = match_rule(&rules, text) {
                    info!("[{key}] keyword rule '{}' matched", rule.keyword);
                    return Ok(rule.reply.clone());
                }
            }
            Err(e) => warn!("[{key}] keyword rules unavailable, skipping: {e}"),
        }

        if let Some(ref provider) = self.provider {
            match provider.complete(&self.system_prompt, text).await {
                Ok(reply) => return Ok(reply),
                Err(e) => warn!("[{key}] {} failed, using fallback reply: {e}", provider.name()),
            }
        }

        Ok(self.fallback_reply.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticRules(Result<Vec<KeywordRule>, ()>);

    #[async_trait]
    impl KeywordRuleSource for StaticRules {
        async fn keyword_rules(&self) -> Result<Vec<KeywordRule>, ConciergeError> {
            self.0
                .clone()
                .map_err(|_| ConciergeError::Store("sheet offline".into()))
        }
    }

    struct EchoProvider {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, system: &str, message: &str) -> Result<String, ConciergeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ConciergeError::Provider("timeout".into()));
            }
            Ok(format!("{system}|{message}"))
        }
    }

    fn rules() -> Vec<KeywordRule> {
        vec![
            KeywordRule {
                keyword: "Horario".to_string(),
                reply: "Atendemos de 9 a 18.".to_string(),
            },
            KeywordRule {
                keyword: "envío".to_string(),
                reply: "Despachamos a todo Chile.".to_string(),
            },
        ]
    }

    fn key() -> ConversationKey {
        ConversationKey::from_canonical("56911112222")
    }

    fn chain(
        rules: Result<Vec<KeywordRule>, ()>,
        provider: Option<Arc<EchoProvider>>,
    ) -> ResponderChain {
        ResponderChain::new(
            Arc::new(StaticRules(rules)),
            provider.map(|p| p as Arc<dyn Provider>),
            "sys".to_string(),
            "fallback".to_string(),
        )
    }

    #[tokio::test]
    async fn test_keyword_rule_wins_over_provider() {
        let provider = Arc::new(EchoProvider {
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let c = chain(Ok(rules()), Some(provider.clone()));
        let reply = c.respond("¿cuál es el HORARIO?", &key()).await.unwrap();
        assert_eq!(reply, "Atendemos de 9 a 18.");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_used_when_no_rule_matches() {
        let provider = Arc::new(EchoProvider {
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let c = chain(Ok(rules()), Some(provider));
        let reply = c.respond("hola", &key()).await.unwrap();
        assert_eq!(reply, "sys|hola");
    }

    #[tokio::test]
    async fn test_rule_source_failure_falls_through() {
        let provider = Arc::new(EchoProvider {
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let c = chain(Err(()), Some(provider));
        let reply = c.respond("horario", &key()).await.unwrap();
        assert_eq!(reply, "sys|horario");
    }

    #[tokio::test]
    async fn test_fixed_reply_when_provider_fails_or_missing() {
        let provider = Arc::new(EchoProvider {
            fail: true,
            calls: AtomicUsize::new(0),
        });
        let c = chain(Ok(rules()), Some(provider));
        assert_eq!(c.respond("hola", &key()).await.unwrap(), "fallback");

        let c = chain(Ok(Vec::new()), None);
        assert_eq!(c.respond("hola", &key()).await.unwrap(), "fallback");
    }

    #[test]
    fn test_match_rule_skips_blank_keywords() {
        let rules = vec![KeywordRule {
            keyword: " ".to_string(),
            reply: "nunca".to_string(),
        }];
        assert!(match_rule(&rules, "lo que sea").is_none());
    }
}
