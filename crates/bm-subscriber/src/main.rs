mod cli;
mod receiver;

use std::io::Write as _;

use anyhow::{bail, Context, Result};
use bm_common::wire::{RequestFrame, ResponseFrame, Role};
use clap::Parser;
use cli::CliArgs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    bm_common::logging::init("bm_subscriber", &bm_common::logging::LoggingConfig::default())
        .context("failed to initialize logging")?;

    let broker = if args.via_directory {
        let brokers = bm_client::query_directory(&args.address, Role::Subscriber)
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

    let stream = bm_client::connect_and_announce(&broker, Role::Subscriber, &args.name)
        .await
        .context("failed to connect to broker")?;
    println!("connected to broker at {}:{}", broker.broker_ip, broker.broker_port);

    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<ResponseFrame>(8);
    tokio::spawn(receiver::run(BufReader::new(read_half), tx));

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = String::new();

    println!("commands: list, subscribe <topic id>, unsubscribe <topic id>, showCurrentSubscription, quit");

    loop {
        line.clear();
        print!("> ");
        std::io::stdout().flush().ok();

        let n = stdin.read_line(&mut line).await.context("failed to read stdin")?;
        if n == 0 {
            return Ok(());
        }
        let command_line = line.trim();
        if command_line.is_empty() {
            continue;
        }
        if command_line == "quit" || command_line == "exit" {
            return Ok(());
        }

        let request = match parse_command(command_line) {
            Ok(request) => request,
            Err(err) => {
                eprintln!("error: {err}");
                continue;
            }
        };

        bm_common::wire::write_frame(&mut write_half, &request)
            .await
            .context("failed to send request")?;

        // Blocks until the receiver task forwards the next response-class
        // frame; pushes arriving in the meantime are printed by
        // the receiver directly and never land on this channel.
        let Some(response) = rx.recv().await else {
            println!("connection to broker lost");
            return Ok(());
        };
        print_response(&response);
    }
}

fn parse_command(line: &str) -> Result<RequestFrame> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "list" => Ok(RequestFrame::List),
        "showCurrentSubscription" => Ok(RequestFrame::ShowCurrentSubscription),
        "subscribe" => {
            if rest.is_empty() {
                bail!("usage: subscribe <topic id>");
            }
            Ok(RequestFrame::Subscribe {
                topic_id: rest.to_string(),
            })
        }
        "unsubscribe" => {
            if rest.is_empty() {
                bail!("usage: unsubscribe <topic id>");
            }
            Ok(RequestFrame::Unsubscribe {
                topic_id: rest.to_string(),
            })
        }
        other => bail!("unknown command {other:?}"),
    }
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

    #[test]
    fn list_takes_no_arguments() {
        assert!(matches!(parse_command("list").unwrap(), RequestFrame::List));
    }

    #[test]
    fn show_current_subscription_takes_no_arguments() {
        assert!(matches!(
            parse_command("showCurrentSubscription").unwrap(),
            RequestFrame::ShowCurrentSubscription
        ));
    }

    #[test]
    fn subscribe_parses_topic_id() {
        let request = parse_command("subscribe 10").unwrap();
        match request {
            RequestFrame::Subscribe { topic_id } => assert_eq!(topic_id, "10"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn subscribe_without_topic_id_is_rejected() {
        assert!(parse_command("subscribe").is_err());
    }

    #[test]
    fn unsubscribe_parses_topic_id() {
        let request = parse_command("unsubscribe 10").unwrap();
        match request {
            RequestFrame::Unsubscribe { topic_id } => assert_eq!(topic_id, "10"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unsubscribe_without_topic_id_is_rejected() {
        assert!(parse_command("unsubscribe").is_err());
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(parse_command("frobnicate").is_err());
    }
}
