use chrono::Duration;

use crate::{storage::Engine, Error, Record, Result};

/// One maintenance operation against a data directory.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Get(String),
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete(String),
    Exists(String),
    All,
    Filter(String),
    Flush,
    Compact,
    Serve,
}

impl Command {
    pub fn from_args(mut args: Vec<String>) -> Result<Self> {
        if args.is_empty() {
            return Err(Error::Command("Empty command".into()));
        }

        let command = args.remove(0).to_lowercase();
        match command.as_str() {
            "get" => Ok(Command::Get(single(&command, args)?)),
            "del" | "delete" => Ok(Command::Delete(single(&command, args)?)),
            "exists" => Ok(Command::Exists(single(&command, args)?)),
            "filter" => Ok(Command::Filter(single(&command, args)?)),
            "set" => match args.len() {
                2 | 3 => {
                    let key = args.remove(0);
                    let value = args.remove(0);
                    let ttl = match args.pop() {
                        Some(ms) => Some(Duration::milliseconds(ms.parse::<i64>().map_err(
                            |_| Error::Command(format!("Invalid TTL value: {}", ms)),
                        )?)),
                        None => None,
                    };
                    Ok(Command::Set { key, value, ttl })
                }
                _ => Err(Error::Command(
                    "set requires KEY VALUE and an optional TTL in milliseconds".into(),
                )),
            },
            "all" => none(Command::All, &command, args),
            "flush" => none(Command::Flush, &command, args),
            "compact" => none(Command::Compact, &command, args),
            "serve" => none(Command::Serve, &command, args),
            _ => Err(Error::Command(format!("Unknown command: {}", command))),
        }
    }

    /// Runs the command and returns the lines to print. `Serve` is handled by the caller.
    pub async fn execute(&self, engine: &Engine) -> Result<Vec<String>> {
        match self {
            Command::Get(key) => match engine.get(key).await {
                Some(record) => Ok(vec![serde_json::to_string(&record)?]),
                None => Ok(vec!["(nil)".into()]),
            },
            Command::Set { key, value, ttl } => {
                let mut record = Record::new(key.clone(), value.clone());
                if let Some(ttl) = ttl {
                    record = record.expiring_in(*ttl);
                }
                engine.set(record).await?;
                Ok(vec!["OK".into()])
            }
            Command::Delete(key) => {
                engine.delete(key).await?;
                Ok(vec!["OK".into()])
            }
            Command::Exists(key) => Ok(vec![engine.exists(key).await.to_string()]),
            Command::All => to_lines(engine.get_all().await),
            Command::Filter(pattern) => to_lines(engine.filter(pattern).await?),
            Command::Flush => {
                engine.delete_all().await?;
                Ok(vec!["OK".into()])
            }
            Command::Compact => {
                engine.compact().await?;
                Ok(vec!["OK".into()])
            }
            Command::Serve => Ok(Vec::new()),
        }
    }
}

fn single(command: &str, mut args: Vec<String>) -> Result<String> {
    if args.len() != 1 {
        return Err(Error::Command(format!(
            "{} requires exactly one argument",
            command
        )));
    }
    Ok(args.remove(0))
}

fn none(parsed: Command, command: &str, args: Vec<String>) -> Result<Command> {
    if !args.is_empty() {
        return Err(Error::Command(format!("{} takes no arguments", command)));
    }
    Ok(parsed)
}

fn to_lines(records: Vec<Record>) -> Result<Vec<String>> {
    records
        .iter()
        .map(|r| serde_json::to_string(r).map_err(Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;
    use tempfile::TempDir;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(
            Command::from_args(args("GET key1")).unwrap(),
            Command::Get("key1".into())
        );
        assert_eq!(
            Command::from_args(args("set key1 value1 1500")).unwrap(),
            Command::Set {
                key: "key1".into(),
                value: "value1".into(),
                ttl: Some(Duration::milliseconds(1500)),
            }
        );
        assert_eq!(Command::from_args(args("flush")).unwrap(), Command::Flush);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(matches!(Command::from_args(vec![]), Err(Error::Command(_))));
        assert!(matches!(Command::from_args(args("get")), Err(Error::Command(_))));
        assert!(matches!(
            Command::from_args(args("set k v soon")),
            Err(Error::Command(_))
        ));
        assert!(matches!(Command::from_args(args("all extra")), Err(Error::Command(_))));
        assert!(matches!(Command::from_args(args("ping")), Err(Error::Command(_))));
    }

    #[tokio::test]
    async fn executes_against_engine() -> Result<()> {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(EngineConfig::new(tmp.path())).await?;

        let run = |line: &str| Command::from_args(args(line));

        assert_eq!(run("set key1 word")?.execute(&engine).await?, vec!["OK"]);
        assert_eq!(run("set key2 world")?.execute(&engine).await?, vec!["OK"]);
        assert_eq!(run("exists key1")?.execute(&engine).await?, vec!["true"]);
        assert_eq!(
            run("get key1")?.execute(&engine).await?,
            vec![r#"{"value":"word","key":"key1"}"#]
        );
        assert_eq!(run("filter wo$d")?.execute(&engine).await?.len(), 2);
        assert_eq!(run("del key1")?.execute(&engine).await?, vec!["OK"]);
        assert_eq!(run("get key1")?.execute(&engine).await?, vec!["(nil)"]);
        assert_eq!(run("flush")?.execute(&engine).await?, vec!["OK"]);
        assert!(run("all")?.execute(&engine).await?.is_empty());

        engine.close().await
    }
}
