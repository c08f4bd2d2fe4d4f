mod cli;

use std::io::Write as _;

use anyhow::{bail, Context, Result};
use bm_common::wire::{Role, ResponseFrame};
use cli::CliArgs;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

const MAX_MESSAGE_LEN: usize = 100;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    bm_common::logging::init("bm_publisher", &bm_common::logging::LoggingConfig::default())
        .context("failed to initialize logging")?;

    let broker = if args.via_directory {
        let brokers = bm_client::query_directory(&args.address, Role::Publisher)
            .await
            .context("failed to query directory")?;
        bm_client::pick_broker(&brokers)
            .context("directory returned no brokers")?
            .clone()
    } else {
        let (ip, port) = args
            .address
            .rsplit_once(':')
            .context("broker address must be host:port")?;
        bm_common::wire::BrokerEntry {
            broker_ip: ip.to_string(),
            broker_port: port.to_string(),
        }
    };

    let stream = bm_client::connect_and_announce(&broker, Role::Publisher, &args.name)
        .await
        .context("failed to connect to broker")?;
    tracing::info!(
        broker_ip = %broker.broker_ip,
        broker_port = %broker.broker_port,
        name = %args.name,
        "connected to broker"
    );
    println!("connected to broker at {}:{}", broker.broker_ip, broker.broker_port);

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut stdin = BufReader::new(tokio::io::stdin());

    println!("commands: create <topic id> <topic name>, publish <topic id> <message>, delete <topic id>, countSubscriber, quit");

    let mut line = String::new();
    loop {
        line.clear();
        print!("> ");
        std::io::stdout().flush().ok();

        let n = stdin.read_line(&mut line).await.context("failed to read stdin")?;
        if n == 0 {
            return Ok(());
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            return Ok(());
        }

        let request = match parse_command(line) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(%err, %line, "rejected command locally");
                eprintln!("error: {err}");
                continue;
            }
        };

        bm_common::wire::write_frame(&mut write_half, &request)
            .await
            .context("failed to send request")?;

        let response: ResponseFrame = bm_common::wire::read_frame(&mut reader)
            .await
            .context("failed to read response")?
            .context("broker closed the connection")?;
        if response.result == bm_common::wire::ResponseResult::Failed {
            tracing::warn!(detail = %response.detail, "broker rejected command");
        }
        print_response(&response);
    }
}

fn parse_command(line: &str) -> Result<bm_common::wire::RequestFrame> {
    use bm_common::wire::RequestFrame;

    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "create" => {
            let (topic_id, topic_name) = rest
                .split_once(' ')
                .context("usage: create <topic id> <topic name>")?;
            check_topic_id(topic_id)?;
            Ok(RequestFrame::Create {
                topic_id: topic_id.to_string(),
                topic_name: topic_name.trim().to_string(),
            })
        }
        "publish" => {
            let (topic_id, message) = rest
                .split_once(' ')
                .context("usage: publish <topic id> <message>")?;
            check_topic_id(topic_id)?;
            let message = message.trim();
            if message.chars().count() > MAX_MESSAGE_LEN {
                bail!("message exceeds {MAX_MESSAGE_LEN} code units");
            }
            Ok(RequestFrame::Publish {
                topic_id: topic_id.to_string(),
                message: message.to_string(),
            })
        }
        "delete" => {
            check_topic_id(rest)?;
            Ok(RequestFrame::Delete {
                topic_id: rest.to_string(),
            })
        }
        "countSubscriber" => Ok(RequestFrame::CountSubscriber),
        other => bail!("unknown command {other:?}"),
    }
}

/// Topic ids are a nonempty string of ASCII digits; the publisher client
/// checks it parses as a signed integer before sending — the
/// broker does not re-validate.
fn check_topic_id(topic_id: &str) -> Result<()> {
    topic_id
        .parse::<i64>()
        .with_context(|| format!("topic id {topic_id:?} is not a valid integer"))?;
    Ok(())
}

fn print_response(response: &ResponseFrame) {
    match response.result {
        bm_common::wire::ResponseResult::Success => println!("ok: {}", response.detail),
        bm_common::wire::ResponseResult::Failed => println!("failed: {}", response.detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bm_common::wire::RequestFrame;

    #[test]
    fn create_parses_topic_id_and_name() {
        let request = parse_command("create 10 weather").unwrap();
        match request {
            RequestFrame::Create { topic_id, topic_name } => {
                assert_eq!(topic_id, "10");
                assert_eq!(topic_name, "weather");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn create_with_non_numeric_topic_id_is_rejected() {
        assert!(parse_command("create abc weather").is_err());
    }

    #[test]
    fn delete_parses_topic_id() {
        let request = parse_command("delete 42").unwrap();
        match request {
            RequestFrame::Delete { topic_id } => assert_eq!(topic_id, "42"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn count_subscriber_takes_no_arguments() {
        assert!(matches!(
            parse_command("countSubscriber").unwrap(),
            RequestFrame::CountSubscriber
        ));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(parse_command("frobnicate").is_err());
    }

    /// Scenario S6: a 101-code-unit message is rejected client-side before
    /// ever reaching the broker.
    #[test]
    fn publish_rejects_message_over_the_cap() {
        let message = "a".repeat(MAX_MESSAGE_LEN + 1);
        let err = parse_command(&format!("publish 10 {message}")).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn publish_accepts_message_exactly_at_the_cap() {
        let message = "a".repeat(MAX_MESSAGE_LEN);
        let request = parse_command(&format!("publish 10 {message}")).unwrap();
        match request {
            RequestFrame::Publish { topic_id, message: sent } => {
                assert_eq!(topic_id, "10");
                assert_eq!(sent.chars().count(), MAX_MESSAGE_LEN);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn check_topic_id_accepts_digits() {
        assert!(check_topic_id("12345").is_ok());
    }

    #[test]
    fn check_topic_id_rejects_non_integer() {
        assert!(check_topic_id("weather").is_err());
    }
}
