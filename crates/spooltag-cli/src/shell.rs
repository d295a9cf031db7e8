//! Line commands and their JSON output.

use std::str::FromStr;

use serde::Serialize;
use spooltag_core::TagRecord;
use spooltag_core::constants::{DEFAULT_KEYS, DEFAULT_MANUFACTURER};
use spooltag_hardware::mock::MockHandle;
use spooltag_session::{
    AutoDetectResponse, AutoStatus, CommandResponse, RequestCoordinator, StatusSnapshot,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Read,
    Write {
        material: u8,
        color: u8,
        manufacturer: u8,
    },
    Auto(bool),
    Mock(MockCommand),
    Quit,
}

/// Commands that drive the mock reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCommand {
    Attach,
    Detach,
    Insert(String),
    Remove,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

impl FromStr for Command {
    type Err = ParseError;

    /// Parse one input line.
    ///
    /// Write arguments go through [`TagRecord::coerce_code`], so anything
    /// non-numeric becomes 0 (manufacturer: 1).
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ParseError::Usage("status | read | write | auto | mock | quit"));
        };
        let args: Vec<&str> = words.collect();

        match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("status", []) => Ok(Self::Status),
            ("read", []) => Ok(Self::Read),
            ("write", [material, color, rest @ ..]) if rest.len() <= 1 => Ok(Self::Write {
                material: TagRecord::coerce_code(material, 0),
                color: TagRecord::coerce_code(color, 0),
                manufacturer: rest
                    .first()
                    .map_or(DEFAULT_MANUFACTURER, |m| {
                        TagRecord::coerce_code(m, DEFAULT_MANUFACTURER)
                    }),
            }),
            ("write", _) => Err(ParseError::Usage("write <material> <color> [manufacturer]")),
            ("auto", ["on"]) => Ok(Self::Auto(true)),
            ("auto", ["off"]) => Ok(Self::Auto(false)),
            ("auto", _) => Err(ParseError::Usage("auto on|off")),
            ("mock", ["attach"]) => Ok(Self::Mock(MockCommand::Attach)),
            ("mock", ["detach"]) => Ok(Self::Mock(MockCommand::Detach)),
            ("mock", ["insert", uid]) => Ok(Self::Mock(MockCommand::Insert(uid.to_uppercase()))),
            ("mock", ["remove"]) => Ok(Self::Mock(MockCommand::Remove)),
            ("mock", _) => Err(ParseError::Usage("mock attach|detach|insert <uid>|remove")),
            ("quit" | "exit", []) => Ok(Self::Quit),
            _ => Err(ParseError::Unknown(line.trim().to_string())),
        }
    }
}

/// One line of output.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "body", rename_all = "camelCase")]
pub enum Output {
    Status(StatusSnapshot),
    Read(CommandResponse),
    Write(CommandResponse),
    AutoDetect(AutoDetectResponse),
    AutoStatus(AutoStatus),
    Mock { ok: bool, message: String },
    Error { message: String },
}

impl Output {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Run one parsed command. `Quit` is handled by the caller.
pub async fn execute(
    command: Command,
    coordinator: &RequestCoordinator,
    mock: Option<&MockHandle>,
) -> Output {
    debug!(command = ?command, "executing");
    match command {
        Command::Status => Output::Status(coordinator.status()),
        Command::Read => Output::Read(coordinator.read().await),
        Command::Write {
            material,
            color,
            manufacturer,
        } => Output::Write(coordinator.write(material, color, manufacturer).await),
        Command::Auto(enable) => Output::AutoDetect(coordinator.set_auto_detect(enable).await),
        Command::Mock(command) => match mock {
            Some(handle) => drive_mock(command, handle).await,
            None => Output::error("mock commands need --mock"),
        },
        Command::Quit => Output::error("quit is not a request"),
    }
}

async fn drive_mock(command: MockCommand, handle: &MockHandle) -> Output {
    let (result, message) = match command {
        MockCommand::Attach => (handle.attach_reader().await, "reader attached".to_string()),
        MockCommand::Detach => (handle.detach_reader().await, "reader detached".to_string()),
        MockCommand::Insert(uid) => {
            handle.ensure_tag(uid.clone(), DEFAULT_KEYS.to_vec());
            let message = format!("tag {} inserted", uid);
            (handle.insert_tag(&uid).await, message)
        }
        MockCommand::Remove => (handle.remove_tag().await, "tag removed".to_string()),
    };

    match result {
        Ok(()) => Output::Mock { ok: true, message },
        Err(e) => Output::Mock {
            ok: false,
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use spooltag_hardware::AnyDriver;
    use spooltag_hardware::mock::MockDriver;
    use spooltag_session::SessionConfig;

    #[rstest]
    #[case("status", Command::Status)]
    #[case("  READ ", Command::Read)]
    #[case("write 5 2", Command::Write { material: 5, color: 2, manufacturer: 1 })]
    #[case("write 5 2 3", Command::Write { material: 5, color: 2, manufacturer: 3 })]
    #[case("write pla red x", Command::Write { material: 0, color: 0, manufacturer: 1 })]
    #[case("write 300 2", Command::Write { material: 0, color: 2, manufacturer: 1 })]
    #[case("auto on", Command::Auto(true))]
    #[case("auto off", Command::Auto(false))]
    #[case("mock insert 04a1b2c3", Command::Mock(MockCommand::Insert("04A1B2C3".to_string())))]
    #[case("mock remove", Command::Mock(MockCommand::Remove))]
    #[case("quit", Command::Quit)]
    fn test_parse(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(line.parse::<Command>(), Ok(expected));
    }

    #[rstest]
    #[case("write 1")]
    #[case("write 1 2 3 4")]
    #[case("auto maybe")]
    #[case("mock insert")]
    #[case("")]
    fn test_parse_usage_errors(#[case] line: &str) {
        assert!(matches!(line.parse::<Command>(), Err(ParseError::Usage(_))));
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            "format c:".parse::<Command>(),
            Err(ParseError::Unknown("format c:".to_string()))
        );
    }

    #[test]
    fn test_output_json_line() {
        let line = Output::Write(CommandResponse::ok(None)).to_json_line().unwrap();
        assert_eq!(line, r#"{"type":"write","body":{"success":true}}"#);

        let line = Output::AutoStatus(AutoStatus::absent()).to_json_line().unwrap();
        assert_eq!(
            line,
            r#"{"type":"autoStatus","body":{"present":false,"tagData":null,"error":null}}"#
        );
    }

    #[tokio::test]
    async fn test_mock_session() {
        let (driver, handle) = MockDriver::new();
        let (coordinator, _rx) =
            RequestCoordinator::new(AnyDriver::Mock(driver), &SessionConfig::default());

        // Open the session so mock events have somewhere to go.
        assert!(matches!(
            execute(Command::Read, &coordinator, Some(&handle)).await,
            Output::Read(CommandResponse { success: false, .. })
        ));

        let attach = Command::Mock(MockCommand::Attach);
        assert!(matches!(
            execute(attach, &coordinator, Some(&handle)).await,
            Output::Mock { ok: true, .. }
        ));
        let insert = Command::Mock(MockCommand::Insert("04A1B2C3".into()));
        assert!(matches!(
            execute(insert, &coordinator, Some(&handle)).await,
            Output::Mock { ok: true, .. }
        ));
        while !coordinator.status().card_present {
            tokio::task::yield_now().await;
        }

        let command = "write 5 2 1".parse().unwrap();
        let written = execute(command, &coordinator, Some(&handle)).await;
        assert!(matches!(written, Output::Write(CommandResponse { success: true, .. })));

        match execute(Command::Read, &coordinator, Some(&handle)).await {
            Output::Read(response) => {
                let record = response.data.unwrap();
                assert_eq!((record.material, record.color, record.manufacturer), (5, 2, 1));
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mock_commands_need_mock() {
        let (driver, _handle) = MockDriver::new();
        let (coordinator, _rx) =
            RequestCoordinator::new(AnyDriver::Mock(driver), &SessionConfig::default());

        let output = execute(Command::Mock(MockCommand::Attach), &coordinator, None).await;
        assert!(matches!(output, Output::Error { .. }));
    }
}
