pub mod anchors;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod db;
pub mod debounce;
pub mod default_prompts;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod openai;
pub mod orchestrator;
pub mod persona;
pub mod playback;
pub mod prompt_pipeline;

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};

use anchors::{extract_links, prepare_for_display, render_numbered_links, InlineLink, LinkAction};
use completion::CompletionProvider;
use config::{ApiConfiguration, ConfigSnapshot, FeatureToggles};
use conversation::{Conversation, ConversationList, Message};
use db::Database;
use debounce::{DebouncedSaver, DEFAULT_SAVE_DEBOUNCE};
use error::ChatError;
use hooks::{Hook, DEFAULT_CHIPS};
use openai::AzureOpenAIClient;
use orchestrator::{TurnObserver, TurnOptions, TurnRunner, TurnStatus};
use persona::{Persona, PersonaSet};
use prompt_pipeline::{validate_overrides, PromptOverrides};

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResult {
    pub conversation_id: String,
    pub content: String,
    pub suggestions: Option<Vec<String>>,
    pub status: String, // "complete" | "degraded" | "failed" | "not_configured"
}

/// A home-screen starter. Clicking it sends `prompt` as a new message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeChip {
    pub label: String,
    pub prompt: String,
}

/// Where completions come from.
#[derive(Clone)]
pub enum ProviderSource {
    /// Build an Azure OpenAI client from the current API configuration.
    Azure,
    /// Always use this provider.
    Fixed(Arc<dyn CompletionProvider>),
}

struct AppState {
    conversations: ConversationList,
    personas: PersonaSet,
    toggles: FeatureToggles,
    api_config: ApiConfiguration,
    overrides: PromptOverrides,
}

// Mirrors every intermediate content into the live assistant message.
struct LiveMessage<'a> {
    state: &'a Mutex<AppState>,
    conversation_id: &'a str,
    forward: &'a mut dyn TurnObserver,
}

impl TurnObserver for LiveMessage<'_> {
    fn on_partial(&mut self, content: &str) {
        if let Ok(mut state) = self.state.lock() {
            let _ = state
                .conversations
                .update_last_message(self.conversation_id, content, None);
        }
        self.forward.on_partial(content);
    }
}

/// Command layer over the chat pipeline and its persisted state.
pub struct ChatApp {
    db: Arc<Database>,
    state: Mutex<AppState>,
    saver: DebouncedSaver<ConversationList>,
    provider_source: ProviderSource,
    turn_options: TurnOptions,
}

impl ChatApp {
    pub fn open(path: &Path) -> Result<Self, String> {
        let db = Database::open(path).map_err(|e| e.to_string())?;
        Self::with_database(db, ProviderSource::Azure, TurnOptions::default())
    }

    /// Load every persisted blob; invalid or missing ones fall back to defaults.
    pub fn with_database(
        db: Database,
        provider_source: ProviderSource,
        turn_options: TurnOptions,
    ) -> Result<Self, String> {
        let db = Arc::new(db);

        let conversations = db
            .load_conversations()
            .map_err(|e| e.to_string())?
            .unwrap_or_default();
        let personas = PersonaSet::new(
            db.load_personas()
                .map_err(|e| e.to_string())?
                .unwrap_or_else(persona::builtin_personas),
            db.load_active_persona().map_err(|e| e.to_string())?,
        );
        let toggles = db.load_toggles().map_err(|e| e.to_string())?;
        let api_config = db
            .load_api_config()
            .map_err(|e| e.to_string())?
            .unwrap_or_default();
        let overrides = db
            .load_prompt_overrides()
            .map_err(|e| e.to_string())?
            .unwrap_or_default();

        logging::log_storage(&format!(
            "Loaded {} conversations, {} personas",
            conversations.len(),
            personas.all().len()
        ));

        let sink_db = Arc::clone(&db);
        let saver = DebouncedSaver::new(DEFAULT_SAVE_DEBOUNCE, move |list: ConversationList| {
            match sink_db.save_conversations(&list) {
                Ok(()) => logging::log_storage(&format!("Saved {} conversations", list.len())),
                Err(e) => logging::log_error(None, &format!("Failed to save conversations: {}", e)),
            }
        });

        Ok(Self {
            db,
            state: Mutex::new(AppState {
                conversations,
                personas,
                toggles,
                api_config,
                overrides,
            }),
            saver,
            provider_source,
            turn_options,
        })
    }

    fn state(&self) -> MutexGuard<'_, AppState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Needs a tokio runtime; the write lands after the quiet interval.
    fn schedule_conversation_save(&self) {
        let list = self.state().conversations.clone();
        self.saver.schedule(list);
    }

    /// Write pending conversation changes now.
    pub fn flush(&self) {
        self.saver.flush();
    }

    /// Configuration a new turn would run with.
    pub fn snapshot(&self) -> ConfigSnapshot {
        let state = self.state();
        ConfigSnapshot {
            toggles: state.toggles,
            persona: state.personas.active(),
            overrides: state.overrides.clone(),
        }
    }

    fn provider(&self, api_config: &ApiConfiguration) -> Result<Arc<dyn CompletionProvider>, ChatError> {
        match &self.provider_source {
            ProviderSource::Fixed(provider) => Ok(Arc::clone(provider)),
            ProviderSource::Azure => {
                let client = AzureOpenAIClient::new(api_config.resolve()?)?;
                Ok(Arc::new(client))
            }
        }
    }

    // ============ Conversations ============

    pub fn create_conversation(&self) -> String {
        let id = self.state().conversations.create();
        logging::log_turn(Some(&id), "Conversation created");
        self.schedule_conversation_save();
        id
    }

    pub fn get_recent_conversations(&self, limit: usize) -> Vec<Conversation> {
        self.state().conversations.recent(limit).to_vec()
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, String> {
        self.state()
            .conversations
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(format!("Conversation {}", conversation_id)).to_string())
    }

    pub fn delete_conversation(&self, conversation_id: &str) -> Result<(), String> {
        self.state()
            .conversations
            .remove(conversation_id)
            .ok_or_else(|| ChatError::NotFound(format!("Conversation {}", conversation_id)).to_string())?;
        self.schedule_conversation_save();
        Ok(())
    }

    // ============ Messaging ============

    pub async fn send_message(
        &self,
        conversation_id: Option<String>,
        text: &str,
    ) -> Result<SendMessageResult, String> {
        self.send_message_with(conversation_id, text, &mut |_: &str| {}).await
    }

    /// Run one turn. Intermediate assistant content is written into the
    /// conversation and forwarded to `on_partial` as it arrives.
    pub async fn send_message_with(
        &self,
        conversation_id: Option<String>,
        text: &str,
        on_partial: &mut dyn TurnObserver,
    ) -> Result<SendMessageResult, String> {
        if text.trim().is_empty() {
            return Err(ChatError::Validation("Message cannot be empty".to_string()).to_string());
        }

        // Snapshot, provider and history are all taken together at turn start.
        let (conversation_id, snapshot, api_config, history) = {
            let mut state = self.state();
            let id = match conversation_id {
                Some(id) if state.conversations.contains(&id) => id,
                _ => state.conversations.create(),
            };
            state
                .conversations
                .append_message(&id, Message::user(text))
                .map_err(|e| e.to_string())?;
            let history = state
                .conversations
                .get(&id)
                .map(|c| c.messages.clone())
                .unwrap_or_default();
            let snapshot = ConfigSnapshot {
                toggles: state.toggles,
                persona: state.personas.active(),
                overrides: state.overrides.clone(),
            };
            (id, snapshot, state.api_config.clone(), history)
        };

        let provider = match self.provider(&api_config) {
            Ok(provider) => provider,
            Err(e) => {
                logging::log_error(Some(&conversation_id), &e.to_string());
                let content = e.to_string();
                self.state()
                    .conversations
                    .append_message(&conversation_id, Message::assistant(content.clone()))
                    .map_err(|e| e.to_string())?;
                self.schedule_conversation_save();
                return Ok(SendMessageResult {
                    conversation_id,
                    content,
                    suggestions: None,
                    status: "not_configured".to_string(),
                });
            }
        };

        self.state()
            .conversations
            .append_message(&conversation_id, Message::assistant(""))
            .map_err(|e| e.to_string())?;

        let outcome = {
            let mut live = LiveMessage {
                state: &self.state,
                conversation_id: &conversation_id,
                forward: on_partial,
            };
            TurnRunner::new(provider.as_ref(), &snapshot, self.turn_options)
                .for_conversation(&conversation_id)
                .run(history, &mut live)
                .await
        };

        if let Err(e) = self.state().conversations.update_last_message(
            &conversation_id,
            &outcome.content,
            outcome.suggestions.clone(),
        ) {
            // Deleted while the turn was running.
            logging::log_error(Some(&conversation_id), &e.to_string());
        }
        self.schedule_conversation_save();

        let status = match outcome.status {
            TurnStatus::Complete => "complete",
            TurnStatus::Degraded => "degraded",
            TurnStatus::Failed => "failed",
        };
        logging::log_turn(Some(&conversation_id), &format!("Turn settled: {}", status));

        Ok(SendMessageResult {
            conversation_id,
            content: outcome.content,
            suggestions: outcome.suggestions,
            status: status.to_string(),
        })
    }

    /// A suggestion pill re-enters the pipeline as a new user message.
    pub async fn click_suggestion(
        &self,
        conversation_id: &str,
        suggestion: &str,
    ) -> Result<SendMessageResult, String> {
        self.send_message(Some(conversation_id.to_string()), suggestion)
            .await
    }

    pub async fn click_inline_link(
        &self,
        conversation_id: &str,
        link: &InlineLink,
    ) -> Result<SendMessageResult, String> {
        let text = match &link.action {
            LinkAction::Ask(question) => question,
            LinkAction::Explain(term) => term,
        };
        self.click_suggestion(conversation_id, text).await
    }

    // ============ Personas ============

    pub fn get_personas(&self) -> Vec<Persona> {
        self.state().personas.all().to_vec()
    }

    pub fn get_active_persona(&self) -> Persona {
        self.state().personas.active()
    }

    pub fn add_persona(&self, name: &str, role: &str, context: &str) -> Result<Persona, String> {
        let mut state = self.state();
        let persona = state
            .personas
            .add(name, role, context)
            .map_err(|e| e.to_string())?;
        self.db
            .save_personas(state.personas.all())
            .map_err(|e| e.to_string())?;
        Ok(persona)
    }

    pub fn delete_persona(&self, persona_id: &str) -> Result<(), String> {
        let mut state = self.state();
        state
            .personas
            .delete(persona_id)
            .map_err(|e| e.to_string())?;
        self.db
            .save_personas(state.personas.all())
            .map_err(|e| e.to_string())?;
        self.db
            .save_active_persona(state.personas.active_id())
            .map_err(|e| e.to_string())
    }

    pub fn set_active_persona(&self, persona_id: &str) -> Result<(), String> {
        let mut state = self.state();
        state
            .personas
            .set_active(persona_id)
            .map_err(|e| e.to_string())?;
        self.db
            .save_active_persona(persona_id)
            .map_err(|e| e.to_string())
    }

    // ============ Toggles ============

    pub fn get_toggles(&self) -> FeatureToggles {
        self.state().toggles
    }

    pub fn set_toggles(&self, toggles: FeatureToggles) -> Result<(), String> {
        self.state().toggles = toggles;
        self.db.save_toggles(&toggles).map_err(|e| e.to_string())
    }

    // ============ API Configuration ============

    pub fn get_api_config(&self) -> ApiConfiguration {
        self.state().api_config.clone()
    }

    pub fn save_api_config(&self, config: ApiConfiguration) -> Result<(), String> {
        let stored = (!config.is_empty()).then_some(&config);
        self.db
            .save_api_config(stored)
            .map_err(|e| e.to_string())?;
        self.state().api_config = config;
        Ok(())
    }

    /// Check the configuration with a tiny request and save it when it works.
    pub async fn validate_and_save_api_config(&self, config: ApiConfiguration) -> Result<bool, String> {
        let resolved = config.resolve().map_err(|e| e.to_string())?;
        let client = AzureOpenAIClient::new(resolved).map_err(|e| e.to_string())?;

        match client.validate_api_key().await {
            Ok(valid) => {
                if valid {
                    self.save_api_config(config)?;
                }
                Ok(valid)
            }
            Err(e) => Err(e.to_string()),
        }
    }

    // ============ Prompt Overrides ============

    pub fn get_prompt_overrides(&self) -> PromptOverrides {
        self.state().overrides.clone()
    }

    pub fn save_prompt_overrides(&self, overrides: PromptOverrides) -> Result<(), String> {
        validate_overrides(&overrides).map_err(|e| e.to_string())?;
        self.db
            .save_prompt_overrides(Some(&overrides))
            .map_err(|e| e.to_string())?;
        self.state().overrides = overrides;
        Ok(())
    }

    pub fn reset_prompt_overrides(&self) -> Result<(), String> {
        self.db
            .save_prompt_overrides(None)
            .map_err(|e| e.to_string())?;
        self.state().overrides = PromptOverrides::default();
        Ok(())
    }

    // ============ Home Screen ============

    /// Re-engagement hooks for the home screen. Empty when the feature is off,
    /// there is no history, or anything goes wrong.
    pub async fn get_conversational_hooks(&self) -> Vec<Hook> {
        let (enabled, conversations, overrides, api_config) = {
            let state = self.state();
            (
                state.toggles.contextual_hook_enabled,
                state.conversations.recent(hooks::MAX_CONVERSATIONS).to_vec(),
                state.overrides.clone(),
                state.api_config.clone(),
            )
        };

        if !enabled || conversations.is_empty() {
            return Vec::new();
        }

        match self.provider(&api_config) {
            Ok(provider) => {
                hooks::generate_hooks(provider.as_ref(), &conversations, Some(&overrides)).await
            }
            Err(e) => {
                logging::log_error(None, &format!("Hooks skipped: {}", e));
                Vec::new()
            }
        }
    }

    /// Chips shown on the home screen: one per hook, or the defaults.
    pub fn home_chips(hooks: &[Hook]) -> Vec<HomeChip> {
        if hooks.is_empty() {
            DEFAULT_CHIPS
                .iter()
                .map(|c| HomeChip {
                    label: c.to_string(),
                    prompt: c.to_string(),
                })
                .collect()
        } else {
            hooks
                .iter()
                .map(|h| HomeChip {
                    label: h.title.clone(),
                    prompt: h.prompt.clone(),
                })
                .collect()
        }
    }

    // ============ Reset ============

    pub fn reset_all_data(&self) -> Result<(), String> {
        self.db.reset_all_data().map_err(|e| e.to_string())?;
        let mut state = self.state();
        state.conversations = ConversationList::new();
        state.personas = PersonaSet::default();
        state.toggles = FeatureToggles::default();
        state.api_config = ApiConfiguration::default();
        state.overrides = PromptOverrides::default();
        Ok(())
    }
}

// ============ Run ============

const HELP: &str = "Commands:
  /new                 start a new conversation
  /list                list recent conversations
  /open <n>            switch to conversation n from /list
  /pill <n>            send suggestion pill n
  /link <n>            follow inline link n
  /personas            list personas
  /persona <id>        set the active persona
  /toggle <name>       flip suggestions | inline | hooks
  /hooks               show home-screen hooks and chips
  /chip <n>            start a conversation from chip n
  /quit                exit
Anything else is sent as a message.";

/// Assistant content as the terminal shows it: link targets and markers
/// hidden, links numbered for `/link <n>`.
fn render_reply(content: &str) -> String {
    render_numbered_links(&prepare_for_display(content))
}

// Hold back a trailing link that has not closed yet, so playback never
// shows half a marker.
fn streamable_prefix(partial: &str) -> &str {
    let tail = partial.rfind(')').map_or(0, |close| close + 1);
    match partial[tail..].find('[') {
        Some(open) => &partial[..tail + open],
        None => partial,
    }
}

fn print_reply(result: &SendMessageResult) -> (Vec<InlineLink>, Vec<String>) {
    let displayed = prepare_for_display(&result.content);
    let links = extract_links(&displayed);
    let pills = result.suggestions.clone().unwrap_or_default();

    println!("\n\n{}\n", render_numbered_links(&displayed));
    for (i, link) in links.iter().enumerate() {
        match &link.action {
            LinkAction::Ask(q) => println!("  link {}: {} -> {}", i + 1, link.display, q),
            LinkAction::Explain(t) => println!("  link {}: {} -> explain \"{}\"", i + 1, link.display, t),
        }
    }
    for (i, pill) in pills.iter().enumerate() {
        println!("  pill {}: {}", i + 1, pill);
    }
    if result.status != "complete" {
        println!("  ({})", result.status);
    }
    (links, pills)
}

async fn repl(app: &ChatApp) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut current: Option<String> = None;
    let mut listed: Vec<String> = Vec::new();
    let mut links: Vec<InlineLink> = Vec::new();
    let mut pills: Vec<String> = Vec::new();

    println!("{}", HELP);
    let mut chips = ChatApp::home_chips(&app.get_conversational_hooks().await);
    for (i, chip) in chips.iter().enumerate() {
        println!("  chip {}: {}", i + 1, chip.label);
    }

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        let index = arg.trim().parse::<usize>().ok().and_then(|n| n.checked_sub(1));

        let outgoing: Option<String> = match command {
            "" => None,
            "/quit" | "/exit" => break,
            "/help" => {
                println!("{}", HELP);
                None
            }
            "/new" => {
                current = Some(app.create_conversation());
                println!("New conversation.");
                None
            }
            "/list" => {
                let recent = app.get_recent_conversations(20);
                for (i, c) in recent.iter().enumerate() {
                    println!("  {}. {} ({} messages)", i + 1, c.title, c.messages.len());
                }
                listed = recent.into_iter().map(|c| c.id).collect();
                None
            }
            "/open" => {
                match index.and_then(|i| listed.get(i)) {
                    Some(id) => {
                        current = Some(id.clone());
                        println!("Opened.");
                    }
                    None => println!("Run /list first, then /open <n>."),
                }
                None
            }
            "/pill" => index.and_then(|i| pills.get(i)).cloned(),
            "/link" => index.and_then(|i| links.get(i)).map(|link| match &link.action {
                LinkAction::Ask(q) => q.clone(),
                LinkAction::Explain(t) => t.clone(),
            }),
            "/personas" => {
                let active = app.get_active_persona().id;
                for p in app.get_personas() {
                    let marker = if p.id == active { "*" } else { " " };
                    println!(" {} {} [{}] {}", marker, p.name, p.id, p.blurb());
                }
                None
            }
            "/persona" => {
                match app.set_active_persona(arg.trim()) {
                    Ok(()) => println!("Persona set."),
                    Err(e) => println!("{}", e),
                }
                None
            }
            "/toggle" => {
                let mut toggles = app.get_toggles();
                match arg.trim() {
                    "suggestions" => toggles.suggestions_enabled = !toggles.suggestions_enabled,
                    "inline" => toggles.inline_suggestions_enabled = !toggles.inline_suggestions_enabled,
                    "hooks" => toggles.contextual_hook_enabled = !toggles.contextual_hook_enabled,
                    other => println!("Unknown toggle '{}'", other),
                }
                if let Err(e) = app.set_toggles(toggles) {
                    println!("{}", e);
                }
                println!("{:?}", app.get_toggles());
                None
            }
            "/hooks" => {
                let hooks = app.get_conversational_hooks().await;
                for hook in &hooks {
                    println!("  {}: {}", hook.title, hook.description);
                }
                chips = ChatApp::home_chips(&hooks);
                for (i, chip) in chips.iter().enumerate() {
                    println!("  chip {}: {}", i + 1, chip.label);
                }
                None
            }
            "/chip" => index.and_then(|i| chips.get(i)).map(|chip| {
                // A chip always opens a fresh conversation.
                current = None;
                chip.prompt.clone()
            }),
            _ => Some(line.to_string()),
        };

        let Some(text) = outgoing else { continue };

        // Playback only ever extends the text; the settled reply is printed whole below.
        let mut shown = String::new();
        let mut print_delta = |partial: &str| {
            let rendered = render_reply(streamable_prefix(partial));
            if let Some(delta) = rendered.strip_prefix(shown.as_str()) {
                print!("{}", delta);
                let _ = std::io::stdout().flush();
                shown = rendered;
            }
        };

        match app.send_message_with(current.clone(), &text, &mut print_delta).await {
            Ok(result) => {
                current = Some(result.conversation_id.clone());
                (links, pills) = print_reply(&result);
            }
            Err(e) => println!("{}", e),
        }
    }

    app.flush();
    Ok(())
}

/// Line-based terminal session over the default store.
pub fn run() {
    if let Err(e) = logging::init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }
    let _ = logging::cleanup_old_logs();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return;
        }
    };

    runtime.block_on(async {
        let app = match ChatApp::open(&db::default_db_path()) {
            Ok(app) => app,
            Err(e) => {
                eprintln!("Failed to open database: {}", e);
                return;
            }
        };
        if let Err(e) = repl(&app).await {
            logging::log_error(None, &format!("Session ended with error: {}", e));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::UnresolvedAnchorPolicy;
    use crate::completion::testing::ScriptedProvider;
    use crate::completion::CompletionRequest;
    use async_trait::async_trait;
    use std::sync::Weak;
    use std::time::Duration;

    fn app_with(provider: ScriptedProvider) -> (ChatApp, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let app = ChatApp::with_database(
            Database::open_in_memory().unwrap(),
            ProviderSource::Fixed(provider.clone()),
            TurnOptions {
                failure_policy: UnresolvedAnchorPolicy::Preserve,
                pacing: None,
            },
        )
        .unwrap();
        (app, provider)
    }

    #[tokio::test]
    async fn test_send_message_settles_into_conversation() {
        let (app, provider) = app_with(
            ScriptedProvider::new()
                .reply("Use [OAuth 2.0](__ANCHOR__) for auth.")
                .reply(r#"{"anchors": {"OAuth 2.0": "How do tokens refresh?"}, "pills": ["Show an example"]}"#),
        );

        let mut partials = Vec::new();
        let result = app
            .send_message_with(None, "How should I do auth?", &mut |s: &str| {
                partials.push(s.to_string())
            })
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 2);
        assert_eq!(result.status, "complete");
        assert_eq!(
            result.content,
            "Use [OAuth 2.0](suggestion:How%20do%20tokens%20refresh%3F) for auth."
        );
        assert_eq!(partials.first().unwrap(), "Use [OAuth 2.0](__ANCHOR__) for auth.");

        let conversation = app.get_conversation(&result.conversation_id).unwrap();
        assert_eq!(conversation.title, "How should I do auth?");
        assert_eq!(conversation.messages.len(), 2);
        let reply = &conversation.messages[1];
        assert_eq!(reply.content, result.content);
        assert_eq!(reply.suggestions, Some(vec!["Show an example".to_string()]));
    }

    #[tokio::test]
    async fn test_degraded_reply_renders_without_markers() {
        let (app, _) = app_with(
            ScriptedProvider::new()
                .reply("Use [OAuth 2.0](__ANCHOR__) for auth.")
                .reply("{not json"),
        );
        let result = app.send_message(None, "How should I do auth?").await.unwrap();
        assert_eq!(result.status, "degraded");
        assert_eq!(result.content, "Use [OAuth 2.0](__ANCHOR__) for auth.");

        let rendered = render_reply(&result.content);
        assert_eq!(rendered, "Use OAuth 2.0 [1] for auth.");
        assert!(!rendered.contains("(__ANCHOR__)"));
        assert!(!rendered.contains("](suggestion:"));
    }

    #[test]
    fn test_playback_holds_back_open_links() {
        assert_eq!(streamable_prefix("Use [OAuth 2.0](__ANC"), "Use ");
        assert_eq!(streamable_prefix("Use [a[0] b"), "Use ");
        assert_eq!(
            render_reply(streamable_prefix("Use [OAuth 2.0](__ANCHOR__) for [J")),
            "Use OAuth 2.0 [1] for "
        );
        assert_eq!(streamable_prefix("Plain text"), "Plain text");
    }

    #[tokio::test]
    async fn test_base_failure_becomes_error_reply() {
        let (app, _) = app_with(ScriptedProvider::new().fail("offline"));
        let result = app.send_message(None, "hello").await.unwrap();
        assert_eq!(result.status, "failed");
        let conversation = app.get_conversation(&result.conversation_id).unwrap();
        assert_eq!(
            conversation.messages.last().unwrap().content,
            orchestrator::BASE_FAILURE_MESSAGE
        );
    }

    #[tokio::test]
    async fn test_missing_configuration_replies_without_network() {
        let app = ChatApp::with_database(
            Database::open_in_memory().unwrap(),
            ProviderSource::Azure,
            TurnOptions::default(),
        )
        .unwrap();
        // A blank saved endpoint falls back to the environment.
        if std::env::var("AZURE_OPENAI_ENDPOINT").is_ok() {
            return;
        }
        let result = app.send_message(None, "hello").await.unwrap();
        assert_eq!(result.status, "not_configured");
        assert!(result.content.contains("endpoint"));
    }

    // Changes the app's settings right after answering the first call.
    struct ReconfiguringProvider {
        script: ScriptedProvider,
        app: Mutex<Weak<ChatApp>>,
    }

    #[async_trait]
    impl CompletionProvider for ReconfiguringProvider {
        async fn complete(&self, request: CompletionRequest) -> error::Result<String> {
            let first = self.script.call_count() == 0;
            let reply = self.script.complete(request).await;
            if first {
                let app = self.app.lock().unwrap().upgrade();
                if let Some(app) = app {
                    app.set_active_persona("creative").unwrap();
                    app.set_toggles(FeatureToggles {
                        suggestions_enabled: false,
                        inline_suggestions_enabled: false,
                        contextual_hook_enabled: true,
                    })
                    .unwrap();
                }
            }
            reply
        }
    }

    #[tokio::test]
    async fn test_settings_changed_mid_turn_apply_to_next_turn() {
        let provider = Arc::new(ReconfiguringProvider {
            script: ScriptedProvider::new()
                .reply("Use [OAuth 2.0](__ANCHOR__) for auth.")
                .reply(r#"{"anchors": {"OAuth 2.0": "How do tokens refresh?"}, "pills": ["Show an example"]}"#)
                .reply("Plain answer."),
            app: Mutex::new(Weak::new()),
        });
        let app = Arc::new(
            ChatApp::with_database(
                Database::open_in_memory().unwrap(),
                ProviderSource::Fixed(provider.clone()),
                TurnOptions {
                    failure_policy: UnresolvedAnchorPolicy::Preserve,
                    pacing: None,
                },
            )
            .unwrap(),
        );
        *provider.app.lock().unwrap() = Arc::downgrade(&app);

        let first = app.send_message(None, "How should I do auth?").await.unwrap();
        assert_eq!(app.get_active_persona().name, "Creative");

        // The in-flight turn still personalizes with the settings it started with.
        let requests = provider.script.requests();
        assert_eq!(requests.len(), 2);
        let overlay_prompt = &requests[1].messages[0].content;
        assert!(overlay_prompt.contains("**User Persona**: General User"));
        assert!(!overlay_prompt.contains("Writer"));
        assert!(overlay_prompt.contains("\"anchors\""));
        assert_eq!(first.suggestions, Some(vec!["Show an example".to_string()]));
        assert_eq!(
            first.content,
            "Use [OAuth 2.0](suggestion:How%20do%20tokens%20refresh%3F) for auth."
        );

        // The next turn sees both toggles off and skips the second call.
        let second = app
            .send_message(Some(first.conversation_id), "Thanks")
            .await
            .unwrap();
        assert_eq!(second.suggestions, None);
        assert_eq!(provider.script.call_count(), 3);
    }

    #[tokio::test]
    async fn test_blank_message_is_rejected() {
        let (app, provider) = app_with(ScriptedProvider::new());
        assert!(app.send_message(None, "   ").await.is_err());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_follows_settings() {
        let (app, provider) = app_with(ScriptedProvider::new().reply("Plain answer."));
        app.set_toggles(FeatureToggles {
            suggestions_enabled: false,
            inline_suggestions_enabled: false,
            contextual_hook_enabled: false,
        })
        .unwrap();
        app.set_active_persona("creative").unwrap();

        let snapshot = app.snapshot();
        assert_eq!(snapshot.persona.name, "Creative");

        let result = app.send_message(None, "hi").await.unwrap();
        assert_eq!(result.suggestions, None);
        assert_eq!(provider.call_count(), 1);

        assert!(app.get_conversational_hooks().await.is_empty());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_settings_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        {
            let app = ChatApp::open(&path).unwrap();
            let persona = app.add_persona("Analyst", "Data Analyst", "Numbers first.").unwrap();
            app.set_active_persona(&persona.id).unwrap();
            let mut overrides = PromptOverrides::default();
            overrides.system_prompt = "Be brief.".to_string();
            app.save_prompt_overrides(overrides).unwrap();
            app.create_conversation();
            app.flush();
        }

        let app = ChatApp::open(&path).unwrap();
        assert_eq!(app.get_active_persona().name, "Analyst");
        assert_eq!(app.get_prompt_overrides().system_prompt, "Be brief.");
        assert_eq!(app.get_recent_conversations(10).len(), 1);

        app.reset_prompt_overrides().unwrap();
        assert_eq!(app.get_prompt_overrides(), PromptOverrides::default());
    }

    #[tokio::test]
    async fn test_invalid_anchor_override_is_rejected() {
        let (app, _) = app_with(ScriptedProvider::new());
        let mut overrides = PromptOverrides::default();
        overrides.anchor_prompt = "Mark key terms.".to_string();
        assert!(app.save_prompt_overrides(overrides).is_err());
        assert_eq!(app.get_prompt_overrides(), PromptOverrides::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversation_saves_are_debounced() {
        let (app, _) = app_with(ScriptedProvider::new());
        app.create_conversation();
        app.create_conversation();
        assert_eq!(app.db.load_conversations().unwrap(), None);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(app.db.load_conversations().unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pill_click_reenters_pipeline() {
        let (app, provider) = app_with(
            ScriptedProvider::new()
                .reply("First.")
                .reply(r#"{"pills": ["Show an example"]}"#)
                .reply("Second.")
                .reply(r#"{"pills": []}"#),
        );
        let first = app.send_message(None, "Explain OAuth").await.unwrap();
        let pill = first.suggestions.unwrap()[0].clone();

        let second = app
            .click_suggestion(&first.conversation_id, &pill)
            .await
            .unwrap();
        assert_eq!(second.conversation_id, first.conversation_id);
        assert_eq!(provider.requests()[2].messages.last().unwrap().content, "Show an example");
        assert_eq!(app.get_conversation(&first.conversation_id).unwrap().messages.len(), 4);
    }

    #[test]
    fn test_home_chips_fall_back_to_defaults() {
        assert_eq!(ChatApp::home_chips(&[]).len(), DEFAULT_CHIPS.len());
        let hooks = vec![Hook {
            title: "Finish the speech".to_string(),
            description: "Opening drafted".to_string(),
            prompt: "Write the closing".to_string(),
        }];
        assert_eq!(
            ChatApp::home_chips(&hooks),
            vec![HomeChip {
                label: "Finish the speech".to_string(),
                prompt: "Write the closing".to_string(),
            }]
        );
    }
}
