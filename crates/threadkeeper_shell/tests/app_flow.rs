use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;

use chat_provider::Usage;
use chat_provider_mock::{MockProvider, MockReply};
use pretty_assertions::assert_eq;
use threadkeeper::{Policy, RangeSpec, ThreadKey};
use threadkeeper_shell::app::{App, Flow, HostOps};
use threadkeeper_shell::config::{AccountConfig, ShellSettings};

#[derive(Default)]
struct HostSpy {
    printed: Vec<String>,
    chunks: Vec<String>,
    questions: Vec<String>,
    answers: VecDeque<bool>,
}

impl HostSpy {
    fn answering(answers: &[bool]) -> Self {
        Self {
            answers: answers.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn last_printed(&self) -> &str {
        self.printed.last().map(String::as_str).unwrap_or_default()
    }
}

impl HostOps for HostSpy {
    fn print(&mut self, text: &str) {
        self.printed.push(text.to_string());
    }

    fn print_chunk(&mut self, chunk: &str) {
        self.chunks.push(chunk.to_string());
    }

    fn confirm(&mut self, question: &str) -> bool {
        self.questions.push(question.to_string());
        self.answers.pop_front().unwrap_or(false)
    }
}

fn app_with(provider: MockProvider, settings: ShellSettings) -> App {
    App::new(Arc::new(provider), settings).expect("app should start")
}

fn run(app: &mut App, host: &mut HostSpy, lines: &[&str]) {
    for line in lines {
        assert_eq!(app.handle_line(line, host), Flow::Continue, "line {line:?}");
    }
}

fn view(app: &App) -> String {
    app.session()
        .current()
        .render(RangeSpec::Whole, true)
        .expect("thread should render")
}

#[test]
fn say_streams_reply_and_appends_it() {
    let mut app = app_with(
        MockProvider::with_replies(["hello there friend"]),
        ShellSettings::default(),
    );
    let mut host = HostSpy::default();

    run(&mut app, &mut host, &["system be nice", "say hi"]);

    assert_eq!(host.chunks.concat(), "hello there friend\n");
    assert_eq!(
        view(&app),
        "system: be nice\nuser: hi\nassistant: hello there friend"
    );
}

#[test]
fn non_streaming_reply_is_printed_whole() {
    let mut app = app_with(MockProvider::with_replies(["one two"]), ShellSettings::default());
    let mut host = HostSpy::default();

    run(&mut app, &mut host, &["stream off", "user go", "send"]);

    assert_eq!(host.last_printed(), "one two");
    assert_eq!(app.session().current().len(), 2);
}

#[test]
fn annotations_and_views_drive_the_current_thread() {
    let mut app = app_with(MockProvider::with_replies([]), ShellSettings::default());
    let mut host = HostSpy::answering(&[true]);

    run(
        &mut app,
        &mut host,
        &[
            "name user Ada",
            "system rules",
            "user first question",
            "assistant first answer",
            "sticky 1",
            "rename assistant Bot",
            "meta 3 score 5",
            "edit 2 first question, revised",
        ],
    );

    assert_eq!(
        view(&app),
        "*system: rules\nAda: first question, revised\nBot: first answer"
    );

    run(&mut app, &mut host, &["meta 3 score"]);
    assert_eq!(host.last_printed(), "score: 5");

    run(&mut app, &mut host, &["last 2"]);
    assert_eq!(
        host.last_printed(),
        "Ada: first question, revised\nBot: first answer"
    );

    run(&mut app, &mut host, &["grep quest"]);
    assert_eq!(host.last_printed(), "2: Ada: first [quest]ion, revised");

    run(&mut app, &mut host, &["clear"]);
    assert_eq!(host.questions, vec!["Delete 2 message(s)?".to_string()]);
    assert_eq!(host.last_printed(), "cleared 2 message(s)");
    assert_eq!(view(&app), "*system: rules");

    run(&mut app, &mut host, &["pop"]);
    assert!(host.last_printed().starts_with("error:"));
    assert_eq!(app.session().current().len(), 1);
}

#[test]
fn retry_forks_named_thread_when_confirmed() {
    let mut settings = ShellSettings::default();
    settings.engine.fork_on_retry = Policy::Ask;
    let mut app = app_with(
        MockProvider::with_replies(["first draft", "second draft"]),
        settings,
    );
    let mut host = HostSpy::answering(&[true]);

    run(&mut app, &mut host, &["thread story", "say write", "retry"]);

    assert_eq!(host.questions, vec!["Create thread \"story2\"?".to_string()]);
    assert_eq!(app.session().current_key(), &ThreadKey::named("story2"));
    assert_eq!(view(&app), "user: write\nassistant: second draft");

    let original = app
        .session()
        .thread(&ThreadKey::named("story"))
        .expect("original thread should remain");
    assert_eq!(
        original.render(RangeSpec::Whole, false).expect("render"),
        "user: write\nassistant: first draft"
    );
}

#[test]
fn retry_in_place_when_fork_declined() {
    let mut settings = ShellSettings::default();
    settings.engine.fork_on_retry = Policy::Ask;
    let mut app = app_with(
        MockProvider::with_replies(["first draft", "second draft"]),
        settings,
    );
    let mut host = HostSpy::answering(&[false]);

    run(&mut app, &mut host, &["thread story", "say write", "retry"]);

    assert_eq!(app.session().current_key(), &ThreadKey::named("story"));
    assert_eq!(view(&app), "user: write\nassistant: second draft");
    assert!(!app.session().contains("story2"));
}

#[test]
fn failed_send_reports_error_and_leaves_thread_unchanged() {
    let mut app = app_with(
        MockProvider::new([MockReply::Fail("backend down".to_string())]),
        ShellSettings::default(),
    );
    let mut host = HostSpy::default();

    run(&mut app, &mut host, &["say hello"]);

    assert!(host.last_printed().starts_with("error:"));
    assert!(host.last_printed().contains("backend down"));
    assert_eq!(view(&app), "user: hello");
}

#[test]
fn empty_message_follows_policy() {
    let mut settings = ShellSettings::default();
    settings.engine.allow_empty_messages = Policy::Ask;
    let mut app = app_with(MockProvider::with_replies([]), settings);
    let mut host = HostSpy::answering(&[false, true]);

    run(&mut app, &mut host, &["user", "user"]);

    assert_eq!(host.questions.len(), 2);
    assert!(host.printed[0].starts_with("error:"));
    assert_eq!(app.session().current().len(), 1);
}

#[test]
fn thread_listing_marks_current_thread() {
    let mut app = app_with(MockProvider::with_replies([]), ShellSettings::default());
    let mut host = HostSpy::default();

    run(
        &mut app,
        &mut host,
        &["user a", "thread one", "user b", "copy 1 2 two", "threads"],
    );

    let listing = &host.printed[host.printed.len() - 3..];
    assert_eq!(
        listing,
        [
            "* one: 2 message(s)".to_string(),
            "  two: 2 message(s)".to_string(),
            "  (detached): 1 message(s)".to_string(),
        ]
    );
}

#[test]
fn save_load_and_quit_track_unsaved_work() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("threads.json");
    let mut app = app_with(MockProvider::with_replies([]), ShellSettings::default());
    let mut host = HostSpy::answering(&[false]);

    run(&mut app, &mut host, &["thread work", "user keep me"]);
    assert_eq!(app.handle_line("quit", &mut host), Flow::Continue);
    assert_eq!(host.questions.len(), 1);

    run(&mut app, &mut host, &[&format!("save {}", path.display())]);
    assert!(path.exists());
    assert_eq!(app.last_path(), Some(path.as_path()));

    run(&mut app, &mut host, &["delete work", "load"]);
    assert!(app.session().contains("work"));
    assert_eq!(app.handle_line("quit", &mut host), Flow::Quit);
    assert_eq!(host.questions.len(), 1);
}

#[test]
fn read_write_and_transcribe_use_files() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let input = dir.path().join("prompt.txt");
    let output = dir.path().join("last.txt");
    let transcript = dir.path().join("transcript.txt");
    fs::write(&input, "from a file").expect("input should be written");

    let mut app = app_with(MockProvider::with_replies(["reply"]), ShellSettings::default());
    let mut host = HostSpy::default();

    run(
        &mut app,
        &mut host,
        &[
            &format!("read {}", input.display()),
            "send",
            &format!("write {} 1", output.display()),
            &format!("transcribe {}", transcript.display()),
        ],
    );

    assert_eq!(
        fs::read_to_string(&output).expect("output should exist"),
        "from a file"
    );
    assert_eq!(
        fs::read_to_string(&transcript).expect("transcript should exist"),
        "user: from a file\nassistant: reply\n"
    );
}

#[test]
fn cost_and_token_usage_are_reported() {
    let mut settings = ShellSettings::default();
    settings.show_cost = true;
    settings.show_token_usage = true;
    let provider = MockProvider::with_replies(["ok"]).with_usage(Usage {
        prompt_tokens: Some(12),
        sampled_tokens: Some(3),
        cost_in_cents: Some(0.5),
    });
    let mut app = app_with(provider, settings);
    let mut host = HostSpy::default();

    run(&mut app, &mut host, &["say hi"]);

    let tail = &host.printed[host.printed.len() - 2..];
    assert_eq!(
        tail,
        [
            "tokens: 12 prompt, 3 sampled".to_string(),
            "session cost: 0.5000¢".to_string(),
        ]
    );
    assert!(!app.costs().incomplete);
}

#[test]
fn provider_settings_commands_validate_through_gateway() {
    let mut app = app_with(MockProvider::with_replies([]), ShellSettings::default());
    let mut host = HostSpy::default();

    run(&mut app, &mut host, &["set temperature 5", "set bogus 1"]);
    assert!(host.last_printed().starts_with("error:"));
    assert_eq!(
        app.gateway().settings().params.get("temperature"),
        Some(&serde_json::json!(2.0))
    );

    run(&mut app, &mut host, &["model mock-large"]);
    assert_eq!(host.last_printed(), "using model mock-large");
    assert_eq!(app.prompt(), "> ");

    run(&mut app, &mut host, &["model nope"]);
    assert!(host.last_printed().starts_with("error:"));

    run(&mut app, &mut host, &["unset"]);
    assert_eq!(host.last_printed(), "removed 1 parameter(s)");
}

#[test]
fn unknown_commands_are_reported() {
    let mut app = app_with(MockProvider::with_replies([]), ShellSettings::default());
    let mut host = HostSpy::default();

    run(&mut app, &mut host, &["dance"]);

    assert_eq!(host.last_printed(), "error: unknown command: dance (try help)");
}

fn contents(app: &App, name: &str) -> Vec<String> {
    app.session()
        .thread(&ThreadKey::named(name))
        .expect("thread should exist")
        .messages()
        .iter()
        .map(|message| message.content.clone())
        .collect()
}

#[test]
fn declined_clear_keeps_messages() {
    let mut app = app_with(MockProvider::with_replies([]), ShellSettings::default());
    let mut host = HostSpy::answering(&[false]);

    run(&mut app, &mut host, &["user a", "user b", "sticky 1", "clear"]);

    assert_eq!(host.questions, vec!["Delete 1 message(s)?".to_string()]);
    assert_eq!(view(&app), "*user: a\nuser: b");

    run(&mut app, &mut host, &["pop", "clear"]);
    assert_eq!(host.questions.len(), 1);
    assert_eq!(host.last_printed(), "no messages to clear");
}

#[test]
fn slice_asks_before_replacing_destination() {
    let mut app = app_with(MockProvider::with_replies([]), ShellSettings::default());
    let mut host = HostSpy::answering(&[false, true]);

    run(
        &mut app,
        &mut host,
        &["user a", "thread dest", "user keep-me", "thread", "user b", "slice -1 dest"],
    );
    assert_eq!(
        host.questions,
        vec!["Replace 2 message(s) in \"dest\"?".to_string()]
    );
    assert_eq!(contents(&app, "dest"), vec!["a", "keep-me"]);

    run(&mut app, &mut host, &["slice -1 dest"]);
    assert_eq!(host.questions.len(), 2);
    assert_eq!(contents(&app, "dest"), vec!["b"]);

    run(&mut app, &mut host, &["slice 1 fresh"]);
    assert_eq!(host.questions.len(), 2);
    assert_eq!(contents(&app, "fresh"), vec!["a"]);
}

#[test]
fn bare_delete_removes_every_named_thread_after_confirmation() {
    let mut app = app_with(MockProvider::with_replies([]), ShellSettings::default());
    let mut host = HostSpy::answering(&[false, true]);

    run(&mut app, &mut host, &["thread one", "thread two", "delete"]);
    assert!(app.session().contains("one"));

    run(&mut app, &mut host, &["delete"]);
    assert_eq!(
        host.questions,
        vec![
            "Delete all 2 named threads?".to_string(),
            "Delete all 2 named threads?".to_string(),
        ]
    );
    assert!(!app.session().contains("one"));
    assert!(!app.session().contains("two"));
}

#[test]
fn macros_expand_arguments_and_shell_state() {
    let mut settings = ShellSettings::default();
    settings.macros.insert(
        "ask".to_string(),
        "# open a thread and ask\nthread {1}\nsay {2?hello} from {thread}".to_string(),
    );
    settings
        .macros
        .insert("twice".to_string(), "ask {*}\nuser {1?x} again".to_string());
    let mut app = app_with(MockProvider::with_replies(["hi back"]), settings);
    let mut host = HostSpy::default();

    run(&mut app, &mut host, &["ask work \"how are you\""]);

    assert_eq!(app.session().current_key(), &ThreadKey::named("work"));
    assert_eq!(
        view(&app),
        "user: how are you from work\nassistant: hi back"
    );

    run(&mut app, &mut host, &["stream off", "twice other"]);
    assert_eq!(app.session().current_key(), &ThreadKey::named("other"));
    assert_eq!(
        contents(&app, "other").last().map(String::as_str),
        Some("other again")
    );
}

#[test]
fn macro_errors_name_the_macro_and_line() {
    let mut settings = ShellSettings::default();
    settings
        .macros
        .insert("broken".to_string(), "user one\nuser {2}".to_string());
    settings
        .macros
        .insert("loop".to_string(), "user before\nloop".to_string());
    let mut app = app_with(MockProvider::with_replies([]), settings);
    let mut host = HostSpy::default();

    run(&mut app, &mut host, &["broken only"]);
    assert_eq!(
        host.last_printed(),
        "error: in macro \"broken\", line 2: missing positional argument 2"
    );
    assert_eq!(app.session().current().len(), 1);

    run(&mut app, &mut host, &["loop"]);
    assert_eq!(
        host.last_printed(),
        "error: in macro \"loop\": recursive invocation of macro \"loop\""
    );
    assert_eq!(app.session().current().len(), 2);
}

#[test]
fn accounts_switch_gateways_and_keep_their_settings() {
    let mut settings = ShellSettings::default();
    settings.prompt = "{account}:{model}> ".to_string();
    settings.accounts.insert(
        "large".to_string(),
        AccountConfig {
            provider: "mock".to_string(),
            model: Some("mock-large".to_string()),
        },
    );
    let mut app = app_with(MockProvider::with_replies([]), settings);
    let mut host = HostSpy::default();

    run(&mut app, &mut host, &["account"]);
    assert_eq!(
        &host.printed[host.printed.len() - 2..],
        ["active account: default".to_string(), "available accounts: large".to_string()]
    );

    run(&mut app, &mut host, &["set temperature 0.5", "account large"]);
    assert_eq!(host.last_printed(), "switched to account \"large\"");
    assert_eq!(app.account(), "large");
    assert_eq!(app.prompt(), "large:mock-large> ");
    assert_eq!(app.gateway().settings().params.get("temperature"), None);

    run(&mut app, &mut host, &["account default"]);
    assert_eq!(app.prompt(), "default:mock> ");
    assert_eq!(
        app.gateway().settings().params.get("temperature"),
        Some(&serde_json::json!(0.5))
    );

    run(&mut app, &mut host, &["account missing"]);
    assert_eq!(host.last_printed(), "error: missing is not a configured account");
    assert_eq!(app.account(), "default");
}
