use rustyline::{Editor, Helper, Config, error::ReadlineError, Context};
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use std::future::Future;
use std::path::Path;

pub const COMMANDS: [&str; 7] = ["status", "json", "logs", "start", "stop", "reload", "exit"];



/*
    @@@
    @CmdCompleter;
    . Drops CmdCompleter into 'rl.set_helper(Some(...))' and get instant, prefix-based command completion.
    . Plugs into rustyline to provide simple tab-completion based on a fixed list of command names.
*/
struct CmdCompleter {
    commands: Vec<String>,
}
impl Helper for CmdCompleter {}
impl Hinter for CmdCompleter {
    type Hint = String;
}
impl Highlighter for CmdCompleter {}
impl Validator for CmdCompleter {}
impl Completer for CmdCompleter {
    type Candidate = Pair;
    fn complete(&self, line: &str, _pos: usize, _ctx: &Context<'_>) -> Result<(usize, Vec<Pair>), ReadlineError> {
        Ok((0, complete_command(&self.commands, line)))
    }
}

fn complete_command(commands: &[String], line: &str) -> Vec<Pair> {
    commands
        .iter()
        .filter(|cmd| cmd.starts_with(line))
        .map(|cmd| Pair {
            display: cmd.clone(),
            replacement: cmd.clone(),
        })
        .collect()
}

/// One parsed shell input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellCommand {
    Status,
    Json,
    Logs(usize),
    Start,
    Stop,
    Reload,
    Exit,
    Empty,
    Unknown,
}

/// `logs` without a count shows this many lines.
pub const DEFAULT_LOG_LINES: usize = 20;

pub fn parse_command(input: &str) -> ShellCommand {
    let mut words = input.split_whitespace();
    let Some(head) = words.next() else {
        return ShellCommand::Empty;
    };
    let rest = words.next();
    match (head, rest) {
        ("status", None) => ShellCommand::Status,
        ("json", None) => ShellCommand::Json,
        ("logs", None) => ShellCommand::Logs(DEFAULT_LOG_LINES),
        ("logs", Some(n)) => n.parse().map(ShellCommand::Logs).unwrap_or(ShellCommand::Unknown),
        ("start", None) => ShellCommand::Start,
        ("stop", None) => ShellCommand::Stop,
        ("reload", None) => ShellCommand::Reload,
        ("exit" | "quit", None) => ShellCommand::Exit,
        _ => ShellCommand::Unknown,
    }
}



/*
    @@@
    @run_shell();
    . Reads commands with rustyline (history kept in `history`) and tab completion over COMMANDS.
    . Dispatches each parsed ShellCommand to its callback and awaits it before prompting again.
    . Returns on `exit`, Ctrl-C or Ctrl-D, saving the history.
*/
pub async fn run_shell<F, Fut>(history: &Path, mut on_command: F) -> rustyline::Result<()>
where
    F: FnMut(ShellCommand) -> Fut,
    Fut: Future<Output = ()>,
{
    let config = Config::builder().build();
    let mut rl = Editor::with_config(config)?;
    rl.set_helper(Some(CmdCompleter {
        commands: COMMANDS.into_iter().map(String::from).collect(),
    }));
    let _ = rl.load_history(history);

    loop {
        let line = rl.readline("rigwatch> ");
        match line {
            Ok(line) => {
                let input = line.trim();
                if !input.is_empty() {
                    rl.add_history_entry(input)?;
                }
                match parse_command(input) {
                    ShellCommand::Exit => break,
                    ShellCommand::Empty => {}
                    ShellCommand::Unknown => println!("Unknown command: {}", input),
                    cmd => on_command(cmd).await,
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            },
        }
    }

    if let Some(dir) = history.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    rl.save_history(history)?;
    Ok(())
}
