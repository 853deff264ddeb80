//! End-to-end coverage through the public `Filter` API: build raw section
//! bytes by hand (as a broadcaster would emit them), feed them through
//! `Filter::process_section`, and check what lands in the schedule store.

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};

use eitsync::config::Config;
use eitsync::eit_processor::EitProcessor;
use eitsync::handlers::{ChannelStore, ClockControl, EpgHandler, ScheduleStore};
use eitsync::model::{ChannelId, Source};
use eitsync::Filter;

fn crc_append(mut section: Vec<u8>) -> Vec<u8> {
    let crc = eitsync::crc32::crc32(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

/// Builds one EIT present/following section with a single event carrying a
/// short_event_descriptor, for `service_id`/`(onid, tsid)`.
fn present_following_section(
    service_id: u16,
    original_network_id: u16,
    transport_stream_id: u16,
    event_id: u16,
    start_time: [u8; 5],
    duration: [u8; 3],
    running_status: u8,
    title: &[u8],
    text: &[u8],
) -> Vec<u8> {
    let mut descriptor = vec![0x4d, (3 + 1 + title.len() + 1 + text.len()) as u8];
    descriptor.extend_from_slice(b"eng");
    descriptor.push(title.len() as u8);
    descriptor.extend_from_slice(title);
    descriptor.push(text.len() as u8);
    descriptor.extend_from_slice(text);

    let mut event = Vec::new();
    event.extend_from_slice(&event_id.to_be_bytes());
    event.extend_from_slice(&start_time);
    event.extend_from_slice(&duration);
    let loop_len = descriptor.len();
    event.push((running_status << 5) | ((loop_len >> 8) as u8 & 0xf));
    event.push((loop_len & 0xff) as u8);
    event.extend_from_slice(&descriptor);

    let mut body = Vec::new();
    body.extend_from_slice(&service_id.to_be_bytes());
    body.push(0x01); // version=0, current_next=1
    body.push(0x00); // section_number
    body.push(0x00); // last_section_number
    body.extend_from_slice(&transport_stream_id.to_be_bytes());
    body.extend_from_slice(&original_network_id.to_be_bytes());
    body.push(0x00); // segment_last_section_number
    body.push(0x4e); // last_table_id
    body.extend_from_slice(&event);

    let section_length = body.len() + 4;
    let mut section = vec![0x4e, 0x80 | ((section_length >> 8) as u8), section_length as u8];
    section.extend_from_slice(&body);
    crc_append(section)
}

struct NoopClock;
impl ClockControl for NoopClock {
    fn set_time(&self, _utc: chrono::DateTime<Utc>) {}
    fn adjust_time(&self, _delta: chrono::Duration) {}
}

struct RecordingHandler(Arc<Mutex<Vec<(u16, Option<Vec<u8>>)>>>);

impl EpgHandler for RecordingHandler {
    fn handle_eit_event(&self, _channel: &ChannelId, event: &eitsync::model::Event) -> bool {
        self.0.lock().unwrap().push((event.event_id, event.title.clone()));
        false
    }
}

#[test]
fn short_event_descriptor_populates_title_and_short_text() {
    let channels = Arc::new(ChannelStore::new());
    let channel = ChannelId::new(Source::Satellite, 1, 2, 3);
    channels.insert(1, 2, 3, channel);
    let schedules = Arc::new(ScheduleStore::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let eit_processor = EitProcessor::new(
        channels.clone(),
        schedules.clone(),
        vec![Box::new(RecordingHandler(seen.clone()))],
        Config::default(),
    );
    let filter = Filter::new(Config::default(), eit_processor, Arc::new(NoopClock));

    // Picked to sit inside the event's own window, so the EPG_LINGER_TIME
    // drop (events already over by more than ~2 hours) doesn't eat it.
    let now = Utc.with_ymd_and_hms(2020, 1, 1, 12, 30, 0).unwrap();
    let start_time = [0xE5, 0xE1, 0x12, 0x00, 0x00]; // 2020-01-01 12:00:00
    let duration = [0x01, 0x00, 0x00]; // 1 hour

    let section = present_following_section(3, 1, 2, 42, start_time, duration, 4, b"Headline News", b"Top stories");
    filter.process_section(now, Config::default().eit_pid, &section);

    schedules.with_events(&channel, |events| {
        let event = events.get(&42).expect("event should be stored");
        assert_eq!(event.title.as_deref(), Some(&b"Headline News"[..]));
        assert_eq!(event.short_text.as_deref(), Some(&b"Top stories"[..]));
        assert_eq!(event.running_status, eitsync::model::RunningStatus::Running);
    });

    let recorded = seen.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0], (42, Some(b"Headline News".to_vec())));
}

#[test]
fn version_bump_is_reprocessed_but_unchanged_version_is_skipped() {
    let channels = Arc::new(ChannelStore::new());
    let channel = ChannelId::new(Source::Cable, 5, 6, 7);
    channels.insert(5, 6, 7, channel);
    let schedules = Arc::new(ScheduleStore::new());
    let eit_processor = EitProcessor::new(channels.clone(), schedules.clone(), Vec::new(), Config::default());
    let now = eitsync::time::valid_time_threshold();

    let start_time = [0xE5, 0xE1, 0x10, 0x00, 0x00];
    let duration = [0x00, 0x30, 0x00];
    let section = present_following_section(7, 5, 6, 1, start_time, duration, 4, b"A", b"a");
    assert!(eit_processor
        .process(now, &eitsync::psi::section::EventInformationSection::parse(&section).unwrap())
        .unwrap());

    // Re-parsing the exact same bytes (same version/section number) is a no-op.
    assert!(!eit_processor
        .process(now, &eitsync::psi::section::EventInformationSection::parse(&section).unwrap())
        .unwrap());
}
