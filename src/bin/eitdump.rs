//! Reads an MPEG-2 transport stream from a file or stdin, feeds its EIT/TDT
//! PIDs through [`eitsync::Filter`], and dumps the resulting schedule as
//! JSON once the input is exhausted. Grounded on the teacher's `cmd::events`
//! (env_logger setup, chrono/serde event dump) adapted to this crate's
//! synchronous, non-tokio processing model.

use std::fs::File;
use std::io::{self, Read};
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use serde::Serialize;

use eitsync::config::Config;
use eitsync::eit_processor::EitProcessor;
use eitsync::handlers::{ChannelStore, ClockControl, ScheduleStore};
use eitsync::model::{ChannelId, Source};
use eitsync::ts::{SectionReassembler, TsPacket};
use eitsync::Filter;

#[derive(Parser)]
#[command(name = "eitdump", about = "Dump an EPG schedule parsed from a TS capture")]
struct Args {
    /// Path to a transport stream capture, or "-" for stdin.
    #[arg(default_value = "-")]
    input: String,

    /// original_network_id:transport_stream_id:service_id to pre-register,
    /// since this crate does not itself discover services from PAT/SDT.
    #[arg(long)]
    channel: Vec<String>,
}

fn parse_channel(s: &str) -> anyhow::Result<(u16, u16, u16)> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        anyhow::bail!("expected onid:tsid:sid, got {:?}", s);
    }
    Ok((parts[0].parse()?, parts[1].parse()?, parts[2].parse()?))
}

struct LoggingClock;

impl ClockControl for LoggingClock {
    fn set_time(&self, utc: chrono::DateTime<Utc>) {
        info!("TDT requests hard clock set to {}", utc);
    }
    fn adjust_time(&self, delta: chrono::Duration) {
        info!("TDT requests smooth clock adjust by {}s", delta.num_seconds());
    }
}

#[derive(Serialize)]
struct EventOut {
    event_id: u16,
    start_time: i64,
    duration: i64,
    title: Option<String>,
    short_text: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let channels = Arc::new(ChannelStore::new());
    if args.channel.is_empty() {
        warn!("no --channel given; sections for unknown services will be dropped");
    }
    let mut parsed_channels = Vec::new();
    for spec in &args.channel {
        let (onid, tsid, sid) = parse_channel(spec)?;
        channels.insert(onid, tsid, sid, ChannelId::new(Source::Other(0), onid, tsid, sid));
        parsed_channels.push((onid, tsid, sid));
    }
    let schedules = Arc::new(ScheduleStore::new());
    let config = Config::default();
    let eit_processor = EitProcessor::new(channels.clone(), schedules.clone(), Vec::new(), config.clone());
    let filter = Filter::new(config.clone(), eit_processor, Arc::new(LoggingClock));

    let mut input: Box<dyn Read> = if args.input == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(&args.input)?)
    };

    let mut raw = Vec::new();
    input.read_to_end(&mut raw)?;

    let mut eit_reassembler = SectionReassembler::new();
    let mut tdt_reassembler = SectionReassembler::new();

    for chunk in raw.chunks(eitsync::ts::TS_PACKET_LENGTH) {
        if chunk.len() < eitsync::ts::TS_PACKET_LENGTH {
            break;
        }
        let packet = match TsPacket::parse(chunk) {
            Ok(p) => p,
            Err(e) => {
                warn!("dropping unparseable TS packet: {}", e);
                continue;
            }
        };
        let now = Utc::now();
        if packet.pid == config.eit_pid {
            if let Some(section) = eit_reassembler.feed(&packet) {
                filter.process_section(now, packet.pid, &section);
            }
        } else if packet.pid == config.tdt_pid {
            if let Some(section) = tdt_reassembler.feed(&packet) {
                filter.process_section(now, packet.pid, &section);
            }
        }
    }

    let mut out = Vec::new();
    for (onid, tsid, sid) in &parsed_channels {
        let channel = match channels.resolve(*onid, *tsid, *sid) {
            Some(c) => c,
            None => continue,
        };
        schedules.with_events(&channel, |events| {
            for event in events.values() {
                out.push(EventOut {
                    event_id: event.event_id,
                    start_time: event.start_time,
                    duration: event.duration,
                    title: event.title.as_ref().map(|t| String::from_utf8_lossy(t).into_owned()),
                    short_text: event.short_text.as_ref().map(|t| String::from_utf8_lossy(t).into_owned()),
                });
            }
        });
    }

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
