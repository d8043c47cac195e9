//! Two-pass chat turn.
//!
//! A turn first asks for objective base content (optionally carrying
//! `[Term](__ANCHOR__)` markers), plays it back, then asks a second call for
//! a persona-aware overlay: questions for the anchors and suggestion pills.
//! The overlay is merged into the base text by the anchor rewriter.
//!
//! Only the base call can fail a turn. Every personalization problem
//! degrades to the base text with markers handled by the failure policy.

use serde_json::Value;

use crate::anchors::{has_anchor_markers, hydrate_anchors, AnchorQuestions, UnresolvedAnchorPolicy};
use crate::completion::{ChatMessage, CompletionProvider, CompletionRequest};
use crate::config::ConfigSnapshot;
use crate::conversation::{Message, Role};
use crate::error::{ChatError, Result};
use crate::logging::{log_error, log_personalize, log_turn};
use crate::playback::{play, PlaybackPacing};
use crate::prompt_pipeline::{
    build_chat_system_prompt, build_personalization_prompt, PersonalizationRequest,
};

pub const BASE_FAILURE_MESSAGE: &str = "Sorry, I encountered an error.";

/// Per-turn behaviour chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOptions {
    /// Applied to markers when the personalization call fails outright.
    pub failure_policy: UnresolvedAnchorPolicy,
    /// `None` skips the typing animation.
    pub pacing: Option<PlaybackPacing>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            failure_policy: UnresolvedAnchorPolicy::Preserve,
            pacing: Some(PlaybackPacing::default()),
        }
    }
}

/// Receives every intermediate assistant content while the turn runs.
pub trait TurnObserver: Send {
    fn on_partial(&mut self, content: &str);
}

impl<F> TurnObserver for F
where
    F: FnMut(&str) + Send,
{
    fn on_partial(&mut self, content: &str) {
        self(content)
    }
}

/// Base content returned by a successful first call. Only the orchestrator
/// constructs it, so personalization cannot start without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseContent(String);

impl BaseContent {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Everything requested was produced (or nothing was requested).
    Complete,
    /// Personalization failed; the base content was kept.
    Degraded,
    /// The base call failed; content is the error message.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub content: String,
    /// `Some` only when pills were requested.
    pub suggestions: Option<Vec<String>>,
    pub status: TurnStatus,
}

#[derive(Debug)]
pub enum TurnState {
    Idle {
        history: Vec<Message>,
    },
    AwaitingBaseContent {
        history: Vec<Message>,
    },
    Streaming {
        user_query: String,
        base: BaseContent,
    },
    AwaitingPersonalization {
        user_query: String,
        base: BaseContent,
        request: PersonalizationRequest,
    },
    Settled(TurnOutcome),
    Failed(TurnOutcome),
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Settled(_) | TurnState::Failed(_))
    }
}

/// Parsed personalization overlay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Personalization {
    pub anchors: AnchorQuestions,
    pub pills: Vec<String>,
}

/// Parse the JSON object of a personalization response. Invalid anchor
/// values and invalid pills are dropped one by one; only a response that is
/// not a JSON object at all is an error.
pub fn parse_personalization(raw: &str) -> Result<Personalization> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_end_matches("```")
        .trim();

    let value: Value = serde_json::from_str(cleaned)?;
    let object = value.as_object().ok_or_else(|| {
        ChatError::InvalidResponse(format!(
            "Personalization response is not a JSON object: {}",
            cleaned
        ))
    })?;

    let anchors = object
        .get("anchors")
        .map(AnchorQuestions::from_json)
        .unwrap_or_default();

    let pills = object
        .get("pills")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|pill| !pill.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(Personalization { anchors, pills })
}

/// Drives one turn against a provider with a fixed configuration snapshot.
pub struct TurnRunner<'a> {
    provider: &'a dyn CompletionProvider,
    snapshot: &'a ConfigSnapshot,
    options: TurnOptions,
    conversation_id: Option<&'a str>,
}

impl<'a> TurnRunner<'a> {
    pub fn new(
        provider: &'a dyn CompletionProvider,
        snapshot: &'a ConfigSnapshot,
        options: TurnOptions,
    ) -> Self {
        Self {
            provider,
            snapshot,
            options,
            conversation_id: None,
        }
    }

    /// Tag log lines with the conversation.
    pub fn for_conversation(mut self, conversation_id: &'a str) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    /// Run a turn to completion. `history` ends with the new user message.
    pub async fn run(&self, history: Vec<Message>, observer: &mut dyn TurnObserver) -> TurnOutcome {
        let mut state = TurnState::Idle { history };
        loop {
            state = match state {
                TurnState::Settled(outcome) | TurnState::Failed(outcome) => return outcome,
                pending => self.step(pending, observer).await,
            };
        }
    }

    /// Advance the state machine by one transition.
    pub async fn step(&self, state: TurnState, observer: &mut dyn TurnObserver) -> TurnState {
        match state {
            TurnState::Idle { history } => {
                log_turn(
                    self.conversation_id,
                    &format!("Turn started with {} messages of history", history.len()),
                );
                TurnState::AwaitingBaseContent { history }
            }

            TurnState::AwaitingBaseContent { history } => {
                let user_query = history
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.clone())
                    .unwrap_or_default();

                match self.generate_base(&history).await {
                    Ok(base) => {
                        log_turn(
                            self.conversation_id,
                            &format!("Base content received ({} chars)", base.0.chars().count()),
                        );
                        TurnState::Streaming { user_query, base }
                    }
                    Err(e) => {
                        log_error(self.conversation_id, &format!("Base generation failed: {}", e));
                        TurnState::Failed(TurnOutcome {
                            content: BASE_FAILURE_MESSAGE.to_string(),
                            suggestions: None,
                            status: TurnStatus::Failed,
                        })
                    }
                }
            }

            TurnState::Streaming { user_query, base } => {
                match &self.options.pacing {
                    Some(pacing) => play(base.as_str(), pacing, |partial| observer.on_partial(partial)).await,
                    None => observer.on_partial(base.as_str()),
                }

                let toggles = &self.snapshot.toggles;
                let request = PersonalizationRequest::new(
                    toggles.inline_suggestions_enabled,
                    toggles.suggestions_enabled,
                    has_anchor_markers(base.as_str()),
                );

                if request.is_needed() {
                    TurnState::AwaitingPersonalization {
                        user_query,
                        base,
                        request,
                    }
                } else {
                    log_turn(self.conversation_id, "No personalization requested");
                    TurnState::Settled(TurnOutcome {
                        content: hydrate_anchors(
                            base.as_str(),
                            &AnchorQuestions::new(),
                            UnresolvedAnchorPolicy::Strip,
                        ),
                        suggestions: None,
                        status: TurnStatus::Complete,
                    })
                }
            }

            TurnState::AwaitingPersonalization {
                user_query,
                base,
                request,
            } => {
                let outcome = match self.personalize(&user_query, &base, request).await {
                    Ok(overlay) => {
                        log_personalize(
                            self.conversation_id,
                            &format!(
                                "Overlay has {} anchor questions and {} pills",
                                overlay.anchors.len(),
                                overlay.pills.len()
                            ),
                        );
                        TurnOutcome {
                            content: hydrate_anchors(
                                base.as_str(),
                                &overlay.anchors,
                                UnresolvedAnchorPolicy::Strip,
                            ),
                            suggestions: request.wants_pills.then_some(overlay.pills),
                            status: TurnStatus::Complete,
                        }
                    }
                    Err(e) => {
                        log_error(
                            self.conversation_id,
                            &format!("Personalization failed, keeping base content: {}", e),
                        );
                        TurnOutcome {
                            content: hydrate_anchors(
                                base.as_str(),
                                &AnchorQuestions::new(),
                                self.options.failure_policy,
                            ),
                            suggestions: request.wants_pills.then(Vec::new),
                            status: TurnStatus::Degraded,
                        }
                    }
                };
                observer.on_partial(&outcome.content);
                TurnState::Settled(outcome)
            }

            terminal => terminal,
        }
    }

    async fn generate_base(&self, history: &[Message]) -> Result<BaseContent> {
        let system_prompt = build_chat_system_prompt(
            Some(&self.snapshot.overrides),
            self.snapshot.toggles.inline_suggestions_enabled,
        );

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history.iter().map(ChatMessage::from));

        let text = self.provider.complete(CompletionRequest::text(messages)).await?;
        Ok(BaseContent(text))
    }

    async fn personalize(
        &self,
        user_query: &str,
        base: &BaseContent,
        request: PersonalizationRequest,
    ) -> Result<Personalization> {
        let system_prompt = build_personalization_prompt(
            Some(&self.snapshot.overrides),
            request,
            &self.snapshot.persona.blurb(),
        );
        let user_content = format!(
            "Here is the User's query:\n\"{}\"\n\nHere is the Assistant's response:\n\"{}\"",
            user_query,
            base.as_str()
        );

        let raw = self
            .provider
            .complete(CompletionRequest::json(vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_content),
            ]))
            .await?;

        parse_personalization(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::ScriptedProvider;
    use crate::config::FeatureToggles;
    use crate::persona::{builtin_personas, default_persona};
    use crate::prompt_pipeline::PromptOverrides;

    const BASE: &str = "Use [OAuth 2.0](__ANCHOR__) for auth.";

    fn snapshot(suggestions: bool, inline: bool) -> ConfigSnapshot {
        ConfigSnapshot {
            toggles: FeatureToggles {
                suggestions_enabled: suggestions,
                inline_suggestions_enabled: inline,
                contextual_hook_enabled: true,
            },
            persona: default_persona(),
            overrides: PromptOverrides::default(),
        }
    }

    fn options(policy: UnresolvedAnchorPolicy) -> TurnOptions {
        TurnOptions {
            failure_policy: policy,
            pacing: None,
        }
    }

    fn history() -> Vec<Message> {
        vec![Message::user("How should I do auth?")]
    }

    async fn run_turn(
        provider: &ScriptedProvider,
        snapshot: &ConfigSnapshot,
        options: TurnOptions,
    ) -> (TurnOutcome, Vec<String>) {
        let mut partials = Vec::new();
        let mut observer = |s: &str| partials.push(s.to_string());
        let outcome = TurnRunner::new(provider, snapshot, options)
            .run(history(), &mut observer)
            .await;
        (outcome, partials)
    }

    #[tokio::test]
    async fn test_no_second_call_when_nothing_requested() {
        let provider = ScriptedProvider::new().reply(BASE);
        let snap = snapshot(false, false);
        let (outcome, _) = run_turn(&provider, &snap, options(UnresolvedAnchorPolicy::Preserve)).await;

        assert_eq!(provider.call_count(), 1);
        assert_eq!(outcome.content, "Use OAuth 2.0 for auth.");
        assert_eq!(outcome.suggestions, None);
        assert_eq!(outcome.status, TurnStatus::Complete);
    }

    #[tokio::test]
    async fn test_no_second_call_when_inline_enabled_but_no_markers() {
        let provider = ScriptedProvider::new().reply("Plain answer.");
        let snap = snapshot(false, true);
        let (outcome, _) = run_turn(&provider, &snap, options(UnresolvedAnchorPolicy::Strip)).await;

        assert_eq!(provider.call_count(), 1);
        assert_eq!(outcome.content, "Plain answer.");
    }

    #[tokio::test]
    async fn test_invalid_json_degrades_with_strip() {
        let provider = ScriptedProvider::new().reply(BASE).reply("{not json");
        let snap = snapshot(true, true);
        let (outcome, _) = run_turn(&provider, &snap, options(UnresolvedAnchorPolicy::Strip)).await;

        assert_eq!(provider.call_count(), 2);
        assert_eq!(outcome.content, "Use OAuth 2.0 for auth.");
        assert_eq!(outcome.suggestions, Some(vec![]));
        assert_eq!(outcome.status, TurnStatus::Degraded);
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_with_preserve() {
        let provider = ScriptedProvider::new().reply(BASE).fail("connection reset");
        let snap = snapshot(false, true);
        let (outcome, _) = run_turn(&provider, &snap, options(UnresolvedAnchorPolicy::Preserve)).await;

        assert_eq!(outcome.content, BASE);
        assert_eq!(outcome.suggestions, None);
        assert_eq!(outcome.status, TurnStatus::Degraded);
    }

    #[tokio::test]
    async fn test_successful_overlay_hydrates_and_attaches_pills() {
        let provider = ScriptedProvider::new()
            .reply("Use [**OAuth 2.0**](__ANCHOR__) with [PKCE](__ANCHOR__).")
            .reply(
                r#"```json
{"anchors": {"OAuth 2.0": "How does the token flow work?", "PKCE": 7},
 "pills": ["Show an example", "", 3, "Compare with SAML"]}
```"#,
            );
        let snap = snapshot(true, true);
        let (outcome, partials) =
            run_turn(&provider, &snap, options(UnresolvedAnchorPolicy::Preserve)).await;

        assert_eq!(
            outcome.content,
            "Use [**OAuth 2.0**](suggestion:How%20does%20the%20token%20flow%20work%3F) with PKCE."
        );
        assert_eq!(
            outcome.suggestions,
            Some(vec!["Show an example".to_string(), "Compare with SAML".to_string()])
        );
        assert_eq!(outcome.status, TurnStatus::Complete);
        assert_eq!(partials.last(), Some(&outcome.content));
    }

    #[tokio::test]
    async fn test_base_failure_is_terminal() {
        let provider = ScriptedProvider::new().fail("401 unauthorized");
        let snap = snapshot(true, true);
        let (outcome, partials) =
            run_turn(&provider, &snap, options(UnresolvedAnchorPolicy::Preserve)).await;

        assert_eq!(provider.call_count(), 1);
        assert_eq!(outcome.content, BASE_FAILURE_MESSAGE);
        assert_eq!(outcome.status, TurnStatus::Failed);
        assert!(partials.is_empty());
    }

    #[tokio::test]
    async fn test_requests_are_ordered_and_shaped() {
        let provider = ScriptedProvider::new()
            .reply(BASE)
            .reply(r#"{"pills": ["Draft the config"]}"#);
        let mut snap = snapshot(true, false);
        snap.persona = builtin_personas()[1].clone();
        run_turn(&provider, &snap, options(UnresolvedAnchorPolicy::Strip)).await;

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);

        let base = &requests[0];
        assert!(!base.json_mode);
        assert_eq!(base.messages[0].role, "system");
        assert!(base.messages[0].content.contains("OBJECTIVE, NEUTRAL, and STANDARD"));
        assert!(!base.messages[0].content.contains("Inline Anchor Identification"));
        assert_eq!(base.messages[1].content, "How should I do auth?");

        let overlay = &requests[1];
        assert!(overlay.json_mode);
        assert!(overlay.messages[0]
            .content
            .contains("**User Persona**: Software Engineer"));
        assert!(!overlay.messages[0].content.contains("\"anchors\""));
        assert!(overlay.messages[1].content.contains("How should I do auth?"));
        assert!(overlay.messages[1].content.contains(BASE));
    }

    #[tokio::test]
    async fn test_playback_reports_partials_before_overlay() {
        let provider = ScriptedProvider::new().reply("Hello world");
        let snap = snapshot(false, false);
        let opts = TurnOptions {
            failure_policy: UnresolvedAnchorPolicy::Strip,
            pacing: Some(PlaybackPacing::instant()),
        };
        let (_, partials) = run_turn(&provider, &snap, opts).await;
        assert_eq!(partials, vec!["Hell", "Hello wo", "Hello world"]);
    }

    #[test]
    fn test_parse_personalization_rejects_non_objects() {
        assert!(parse_personalization("[1, 2]").is_err());
        assert!(parse_personalization("nope").is_err());
        let empty = parse_personalization("{}").unwrap();
        assert!(empty.anchors.is_empty());
        assert!(empty.pills.is_empty());
    }
}
