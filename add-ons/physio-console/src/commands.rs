//! Console input: slash commands, anything else is a typed answer.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Reset,
    Mute,
    Unmute,
    Listen,
    /// Start the body-part video now instead of waiting for the countdown.
    Camera,
    /// Send a recorded video file as the body-part turn.
    Video(PathBuf),
    /// Run range-of-motion capture with a still JPEG as the camera.
    Rom(PathBuf),
    Dashboard,
    Status,
    Help,
    Quit,
    /// Typed stand-in for a spoken transcript.
    Say(String),
    Empty,
    /// Bad command or missing argument; carries the message to show.
    Invalid(String),
}

pub const HELP: &str = "\
Commands:
  /start            create the assessment and greet
  /listen           capture one spoken answer
  /mute, /unmute    toggle the microphone
  /camera           start body-part capture now
  /video <file>     send a recorded body-part video
  /rom <jpeg>       run range-of-motion capture using a still frame
  /dashboard        fetch the assessment summary
  /status           show the session state
  /reset            start over
  /quit             exit
Anything else is sent as your answer.";

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match name.to_ascii_lowercase().as_str() {
        "start" => Command::Start,
        "reset" | "restart" => Command::Reset,
        "mute" => Command::Mute,
        "unmute" => Command::Unmute,
        "listen" | "mic" => Command::Listen,
        "camera" => Command::Camera,
        "video" => with_path(arg, "/video needs a file path", Command::Video),
        "rom" => with_path(arg, "/rom needs a JPEG path", Command::Rom),
        "dashboard" => Command::Dashboard,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => Command::Invalid(format!("Unknown command /{} (try /help)", other)),
    }
}

fn with_path(arg: &str, missing: &str, make: fn(PathBuf) -> Command) -> Command {
    if arg.is_empty() {
        Command::Invalid(missing.to_string())
    } else {
        make(PathBuf::from(arg))
    }
}
