//! Integration tests for the threaded sink, driven through a mock
//! PCM device so no sound card is needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cod_audio::{
    AddedPacket, DeviceError, DeviceFormat, DeviceOpener, Negotiated, PcmDevice, Sink, SinkError,
    ThreadedSink, WriteError,
};
use cod_core::{model::Track, AudioPacket, Disc, PacketFlags};

/// Everything the mock device records, shared with the test body.
#[derive(Default)]
struct MockControl {
    written: Mutex<Vec<u8>>,
    opens: AtomicUsize,
    fail_opens: AtomicUsize,
    pauses: AtomicUsize,
    drains: AtomicUsize,
    discards: AtomicUsize,
}

struct MockOpener {
    control: Arc<MockControl>,
    period_frames: usize,
    swap_bytes: bool,
    write_delay: Duration,
}

impl MockOpener {
    fn new(control: Arc<MockControl>) -> Self {
        Self {
            control,
            period_frames: 1000,
            swap_bytes: false,
            write_delay: Duration::ZERO,
        }
    }
}

impl DeviceOpener for MockOpener {
    fn open(
        &mut self,
        _format: &DeviceFormat,
    ) -> Result<(Box<dyn PcmDevice>, Negotiated), DeviceError> {
        self.control.opens.fetch_add(1, Ordering::SeqCst);

        if self
            .control
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DeviceError::new("No such file or directory"));
        }

        Ok((
            Box::new(MockDevice {
                control: Arc::clone(&self.control),
                write_delay: self.write_delay,
            }),
            Negotiated {
                period_frames: self.period_frames,
                swap_bytes: self.swap_bytes,
            },
        ))
    }
}

struct MockDevice {
    control: Arc<MockControl>,
    write_delay: Duration,
}

impl PcmDevice for MockDevice {
    fn write_period(&mut self, data: &[u8], frames: usize) -> Result<usize, WriteError> {
        if !self.write_delay.is_zero() {
            thread::sleep(self.write_delay);
        }
        self.control.written.lock().unwrap().extend_from_slice(data);
        Ok(frames)
    }

    fn recover(&mut self, _error: &WriteError) -> bool {
        true
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.control.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unpause(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn drain(&mut self) -> Result<(), DeviceError> {
        self.control.drains.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn discard(&mut self) -> Result<(), DeviceError> {
        self.control.discards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn format() -> DeviceFormat {
    DeviceFormat {
        channels: 2,
        rate: 8000,
        big_endian: true,
    }
}

fn test_packet() -> Arc<AudioPacket> {
    let mut disc = Disc::new("testId", "disc.cdr");
    disc.add_track(Track {
        length: 1_000_000,
        file_length: 1_000_000,
        ..Track::default()
    });
    Arc::new(AudioPacket::new(&disc, 0, 0, 1000, PacketFlags::default()))
}

/// Push a whole data slice through add_packet the way the transport
/// does.
fn feed(sink: &ThreadedSink, packet: &Arc<AudioPacket>, data: &[u8]) -> AddedPacket {
    let mut offset = 0;
    loop {
        let added = sink.add_packet(packet, &data[offset..]);
        offset += added.stored;
        if added.closed || offset >= data.len() {
            return added;
        }
    }
}

fn drain_fully(sink: &ThreadedSink) {
    while sink.drain().is_some() {}
}

#[test]
fn play_and_drain_delivers_all_bytes() {
    let control = Arc::new(MockControl::default());
    let sink = ThreadedSink::new(Box::new(MockOpener::new(Arc::clone(&control))));

    sink.start(format()).unwrap();

    let packet = test_packet();
    let data: Vec<u8> = (0..8000u32).map(|i| (i % 251) as u8).collect();
    feed(&sink, &packet, &data);
    drain_fully(&sink);

    // Two whole periods of 4000 bytes, no padding needed
    assert_eq!(*control.written.lock().unwrap(), data);
    assert_eq!(control.drains.load(Ordering::SeqCst), 1);

    // Draining closed the sink, so it can be started again
    sink.start(format()).unwrap();
    sink.stop();
}

#[test]
fn partial_period_is_zero_padded_at_drain() {
    let control = Arc::new(MockControl::default());
    let sink = ThreadedSink::new(Box::new(MockOpener::new(Arc::clone(&control))));

    sink.start(format()).unwrap();

    let packet = test_packet();
    feed(&sink, &packet, &[1, 2, 3, 4]);
    drain_fully(&sink);

    let written = control.written.lock().unwrap();
    assert_eq!(written.len(), 4000);
    assert_eq!(&written[..4], &[1, 2, 3, 4]);
    assert!(written[4..].iter().all(|&b| b == 0));
}

#[test]
fn swap_bytes_is_applied_on_append() {
    let control = Arc::new(MockControl::default());
    let mut opener = MockOpener::new(Arc::clone(&control));
    opener.swap_bytes = true;
    let sink = ThreadedSink::new(Box::new(opener));

    sink.start(format()).unwrap();
    feed(&sink, &test_packet(), &[1, 2, 3, 4]);
    drain_fully(&sink);

    let written = control.written.lock().unwrap();
    assert_eq!(&written[..4], &[2, 1, 4, 3]);
}

#[test]
fn start_twice_is_invalid_without_side_effects() {
    let control = Arc::new(MockControl::default());
    let sink = ThreadedSink::new(Box::new(MockOpener::new(Arc::clone(&control))));

    sink.start(format()).unwrap();
    assert!(matches!(
        sink.start(format()),
        Err(SinkError::InvalidState { op: "start", .. })
    ));

    sink.stop();
}

#[test]
fn stop_when_closed_is_a_no_op() {
    let control = Arc::new(MockControl::default());
    let sink = ThreadedSink::new(Box::new(MockOpener::new(control)));

    sink.stop();
    sink.stop();
}

#[test]
fn pause_and_resume() {
    let control = Arc::new(MockControl::default());
    let sink = ThreadedSink::new(Box::new(MockOpener::new(Arc::clone(&control))));

    // Pause is rejected while closed
    assert!(!sink.pause());

    sink.start(format()).unwrap();
    feed(&sink, &test_packet(), &vec![0u8; 4000]);

    assert!(sink.pause());
    assert_eq!(control.pauses.load(Ordering::SeqCst), 1);

    // Pausing while paused is a no-op
    assert!(sink.pause());
    assert_eq!(control.pauses.load(Ordering::SeqCst), 1);

    sink.resume();
    drain_fully(&sink);
}

#[test]
fn stop_discards_buffered_audio() {
    let control = Arc::new(MockControl::default());
    let mut opener = MockOpener::new(Arc::clone(&control));
    // Slow device so data stays buffered
    opener.write_delay = Duration::from_millis(50);
    let sink = ThreadedSink::new(Box::new(opener));

    sink.start(format()).unwrap();
    feed(&sink, &test_packet(), &vec![0u8; 20_000]);
    sink.stop();

    assert_eq!(control.discards.load(Ordering::SeqCst), 1);
    // Not everything was played
    assert!(control.written.lock().unwrap().len() < 20_000);
}

#[test]
fn add_packet_reports_closed_after_stop() {
    let control = Arc::new(MockControl::default());
    let mut opener = MockOpener::new(Arc::clone(&control));
    opener.write_delay = Duration::from_millis(20);
    let sink = Arc::new(ThreadedSink::new(Box::new(opener)));

    sink.start(format()).unwrap();

    let feeder = {
        let sink = Arc::clone(&sink);
        thread::spawn(move || {
            let packet = test_packet();
            let data = vec![0u8; 1_000_000];
            feed(&sink, &packet, &data)
        })
    };

    thread::sleep(Duration::from_millis(100));
    sink.stop();

    let added = feeder.join().unwrap();
    assert!(added.closed);
}

#[test]
fn tripwire_reports_playing_packet_changes() {
    let control = Arc::new(MockControl::default());
    let mut opener = MockOpener::new(Arc::clone(&control));
    opener.write_delay = Duration::from_millis(10);
    let sink = ThreadedSink::new(Box::new(opener));

    sink.start(format()).unwrap();

    let first = test_packet();
    let second = test_packet();

    feed(&sink, &first, &vec![1u8; 4000]);
    feed(&sink, &second, &vec![2u8; 4000]);

    // Draining reports progress as the audible packet changes; the
    // second packet must show up before the sink closes
    let mut saw_second = false;
    while let Some(progress) = sink.drain() {
        if let Some(playing) = progress.playing {
            if Arc::ptr_eq(&playing, &second) {
                saw_second = true;
            }
        }
    }
    assert!(saw_second);
}

#[test]
fn open_failure_surfaces_device_error() {
    let control = Arc::new(MockControl::default());
    control.fail_opens.store(1, Ordering::SeqCst);
    let sink = ThreadedSink::new(Box::new(MockOpener::new(Arc::clone(&control))));

    sink.start(format()).unwrap();

    // The first interaction picks up the open failure
    let added = sink.add_packet(&test_packet(), &[0u8; 100]);
    assert_eq!(added.error.as_deref(), Some("No such file or directory"));

    // After the retry backoff the device opens and the error clears
    let packet = test_packet();
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let added = feed(&sink, &packet, &vec![0u8; 4000]);
        if added.error.is_none() && !added.closed {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "device never recovered"
        );
        thread::sleep(Duration::from_millis(100));
    }

    assert!(control.opens.load(Ordering::SeqCst) >= 2);
    drain_fully(&sink);
}
