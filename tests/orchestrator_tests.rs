//! End-to-end scheduling tests against the loopback backend

use std::sync::atomic::Ordering;

use transmux::adapters::loopback::{LoopbackBackend, MuxEvent, ScriptedPoll};
use transmux::adapters::session::SessionSpec;
use transmux::engine::{Options, PrintStats, RunOutcome};
use transmux::model::{OutputStreamKey, PipelineGraph};
use transmux::streams::subtitle::{RectKind, Subtitle, SubtitleRect};
use transmux::Scheduler;

fn quiet_options() -> Options {
    Options {
        print_stats: PrintStats::Quiet,
        ..Options::default()
    }
}

fn build_scheduler(json: &str, opts: Options) -> (Scheduler, LoopbackBackend) {
    let spec: SessionSpec = serde_json::from_str(json).expect("session parses");
    let (graph, backend) = spec.build().expect("session builds");
    let scheduler = Scheduler::new(
        graph,
        Box::new(backend.demuxer()),
        Box::new(backend.decoder()),
        Box::new(backend.filters()),
        Box::new(backend.output()),
        opts,
        None,
    )
    .expect("scheduler builds");
    (scheduler, backend)
}

fn muxed_dts(backend: &LoopbackBackend) -> Vec<Option<i64>> {
    backend
        .events()
        .into_iter()
        .filter_map(|event| match event {
            MuxEvent::Packet { dts, .. } => Some(dts),
            _ => None,
        })
        .collect()
}

const COPY_SESSION: &str = r#"{
    "inputs": [{
        "streams": [{ "kind": "video", "codec": "h264" }],
        "packets": [
            { "stream": 0, "dts_us": 0, "pts_us": 0, "key": true, "size": 100 },
            { "stream": 0, "dts_us": 33000, "pts_us": 33000, "size": 100 },
            { "stream": 0, "dts_us": 66000, "pts_us": 66000, "size": 100 }
        ]
    }],
    "outputs": [{
        "streams": [{ "kind": "video", "source": { "file": 0, "stream": 0 } }]
    }]
}"#;

#[test]
fn single_stream_copy_muxes_in_order_and_finalizes() {
    let (mut scheduler, backend) = build_scheduler(COPY_SESSION, quiet_options());
    let RunOutcome {
        result,
        err_rate_exceeded,
    } = scheduler.run();

    assert!(result.is_ok());
    assert!(!err_rate_exceeded);
    assert_eq!(
        muxed_dts(&backend),
        vec![Some(0), Some(33_000), Some(66_000)]
    );

    let ost = &scheduler.graph().outputs[0].streams[0];
    assert_eq!(ost.last_mux_dts, Some(66_000));
    assert_eq!(ost.packets_written.load(Ordering::Relaxed), 3);
    assert_eq!(backend.trailers(), vec![0]);
}

#[test]
fn every_output_is_finished_after_a_normal_run() {
    let (mut scheduler, _backend) = build_scheduler(COPY_SESSION, quiet_options());
    scheduler.run();
    let graph: &PipelineGraph = scheduler.graph();
    for key in graph.output_streams() {
        assert!(
            graph.ost(key).encoder_finished(),
            "stream {}:{} not finished",
            key.file,
            key.stream
        );
    }
}

#[test]
fn recording_time_cap_closes_the_output() {
    let session = r#"{
        "inputs": [{
            "recording_time_us": 100000,
            "streams": [{ "kind": "video" }],
            "packets": [
                { "stream": 0, "dts_us": 0, "key": true, "size": 10 },
                { "stream": 0, "dts_us": 50000, "size": 10 },
                { "stream": 0, "dts_us": 150000, "size": 10 }
            ]
        }],
        "outputs": [{
            "streams": [{ "kind": "video", "source": { "file": 0, "stream": 0 } }]
        }]
    }"#;

    let (mut scheduler, backend) = build_scheduler(session, quiet_options());
    {
        // closing the stream must also release its sync-queue slot
        let of = &mut scheduler.graph_mut().outputs[0];
        of.sq_encode = Some(Box::new(backend.sync_queue()));
        of.streams[0].sq_idx_encode = Some(3);
    }
    let outcome = scheduler.run();

    assert!(outcome.result.is_ok());
    // the packet at 150 ms crosses the 100 ms cap: never muxed
    assert_eq!(muxed_dts(&backend), vec![Some(0), Some(50_000)]);
    let ost = &scheduler.graph().outputs[0].streams[0];
    assert_eq!(ost.packets_written.load(Ordering::Relaxed), 2);
    assert!(ost.encoder_finished());
    assert!(backend.sync_eofs().contains(&3));
    assert_eq!(backend.trailers(), vec![0]);
}

#[test]
fn decode_error_rate_above_ceiling_is_flagged() {
    let (mut scheduler, _backend) = build_scheduler(
        COPY_SESSION,
        Options {
            max_error_rate: 0.2,
            ..quiet_options()
        },
    );
    {
        let ist = &mut scheduler.graph_mut().inputs[0].streams[0];
        ist.frames_decoded = 40;
        ist.decode_errors = 10;
    }

    let outcome = scheduler.run();
    assert!(outcome.err_rate_exceeded);
    assert_eq!(
        transmux::error::resolve_exit_code(false, outcome.err_rate_exceeded, &outcome.result),
        69
    );
}

#[test]
fn low_decode_error_rate_passes() {
    let (mut scheduler, _backend) = build_scheduler(COPY_SESSION, quiet_options());
    {
        let ist = &mut scheduler.graph_mut().inputs[0].streams[0];
        ist.frames_decoded = 49;
        ist.decode_errors = 1;
    }
    let outcome = scheduler.run();
    assert!(!outcome.err_rate_exceeded);
}

#[test]
fn key_packet_extends_previous_subtitle_before_muxing() {
    let session = r#"{
        "inputs": [{
            "streams": [
                { "kind": "video" },
                { "kind": "subtitle", "decoding_needed": true, "fix_sub_duration": true }
            ],
            "packets": [
                { "stream": 0, "pts_us": 2000000, "dts_us": 2000000, "key": true, "size": 10 }
            ]
        }],
        "outputs": [{
            "streams": [
                {
                    "kind": "video",
                    "source": { "file": 0, "stream": 0 },
                    "fix_sub_duration_heartbeat": true
                },
                {
                    "kind": "subtitle",
                    "source": { "file": 0, "stream": 1 },
                    "encoder": "dvdsub"
                }
            ]
        }]
    }"#;

    let (mut scheduler, backend) = build_scheduler(session, quiet_options());
    scheduler.graph_mut().inputs[0].streams[1].prev_sub = Some(Subtitle {
        format: 0,
        start_display_time: 0,
        end_display_time: 500,
        pts: Some(1_000_000),
        rects: vec![SubtitleRect {
            kind: RectKind::Ass,
            flags: 0,
            x: 0,
            y: 0,
            w: 0,
            h: 0,
            nb_colors: 0,
            data: [None, None, None, None],
            linesize: [0; 4],
            text: None,
            ass: Some("Dialogue: hello".to_string()),
        }],
    });

    let outcome = scheduler.run();
    assert!(outcome.result.is_ok());

    // the cloned subtitle goes through the subtitle path before the video
    // packet reaches the muxer
    let events = backend.events();
    let sub_at = events
        .iter()
        .position(|e| matches!(e, MuxEvent::Subtitle { pts: Some(2_000_000) }))
        .expect("subtitle re-submitted");
    let pkt_at = events
        .iter()
        .position(|e| {
            matches!(
                e,
                MuxEvent::Packet {
                    output: OutputStreamKey { file: 0, stream: 0 },
                    ..
                }
            )
        })
        .expect("video packet muxed");
    assert!(sub_at < pkt_at, "events: {events:?}");

    let prev = scheduler.graph().inputs[0].streams[1]
        .prev_sub
        .as_ref()
        .unwrap();
    assert_eq!(prev.pts, Some(2_000_000));
}

#[test]
fn packets_refresh_sparse_subtitle_filter_inputs() {
    let session = r#"{
        "filtergraphs": [{ "simple": false }],
        "inputs": [{
            "streams": [
                { "kind": "video" },
                { "kind": "subtitle", "filters": [{ "graph": 0, "input": 0 }] }
            ],
            "packets": [
                { "stream": 0, "pts_us": 0, "dts_us": 0, "key": true, "size": 10 },
                { "stream": 0, "pts_us": 40000, "dts_us": 40000, "size": 10 }
            ]
        }],
        "outputs": [{
            "streams": [{ "kind": "video", "source": { "file": 0, "stream": 0 } }]
        }]
    }"#;

    let (mut scheduler, backend) = build_scheduler(session, quiet_options());
    scheduler.run();

    let beats = backend.heartbeats();
    let pts: Vec<Option<i64>> = beats.iter().map(|(_, pts)| *pts).collect();
    assert!(pts.contains(&Some(0)));
    assert!(pts.contains(&Some(40_000)));
}

#[test]
fn input_loop_restart_flushes_decoders_and_reports_audio_duration() {
    let session = r#"{
        "inputs": [{
            "streams": [{
                "kind": "audio",
                "decoding_needed": true,
                "sample_rate": 48000
            }],
            "packets": [
                { "stream": 0, "dts_us": 0, "size": 10 }
            ]
        }],
        "outputs": [{
            "streams": [{ "kind": "audio", "source": { "file": 0, "stream": 0 } }]
        }]
    }"#;

    let (mut scheduler, backend) = build_scheduler(session, quiet_options());
    backend.push(0, ScriptedPoll::Restart);

    let (tx, rx) = crossbeam_channel::unbounded();
    scheduler.graph_mut().inputs[0].audio_duration_tx = Some(tx);
    scheduler.graph_mut().inputs[0].streams[0].nb_samples = 48_000;

    let outcome = scheduler.run();
    assert!(outcome.result.is_ok());

    let dur = rx.try_recv().expect("last frame duration reported");
    assert_eq!(dur.stream_index, 0);
    // 48000 samples at 48 kHz in a microsecond time base
    assert_eq!(dur.duration, 1_000_000);
}

#[test]
fn demuxer_backoff_marks_output_unavailable_then_recovers() {
    let (mut scheduler, backend) = build_scheduler(
        r#"{
            "inputs": [{ "streams": [{ "kind": "video" }] }],
            "outputs": [{
                "streams": [{ "kind": "video", "source": { "file": 0, "stream": 0 } }]
            }]
        }"#,
        quiet_options(),
    );
    backend.push(0, ScriptedPoll::Again);
    backend.push(
        0,
        ScriptedPoll::Packet(transmux::model::Packet {
            dts_est: Some(0),
            ..transmux::model::Packet::empty(0)
        }),
    );

    let outcome = scheduler.run();
    assert!(outcome.result.is_ok());
    assert_eq!(muxed_dts(&backend), vec![Some(0)]);
}

#[test]
fn demuxer_error_without_xerror_finishes_like_eof() {
    let (mut scheduler, backend) = build_scheduler(COPY_SESSION, quiet_options());
    backend.push(0, ScriptedPoll::Error("bitstream damaged".to_string()));

    let outcome = scheduler.run();
    assert!(outcome.result.is_ok());
    assert_eq!(backend.trailers(), vec![0]);
    assert_eq!(
        transmux::error::resolve_exit_code(false, false, &outcome.result),
        0
    );
}

#[test]
fn demuxer_error_with_xerror_aborts() {
    let session = r#"{
        "inputs": [{ "streams": [{ "kind": "video" }] }],
        "outputs": [{
            "streams": [{ "kind": "video", "source": { "file": 0, "stream": 0 } }]
        }]
    }"#;
    let (mut scheduler, backend) = build_scheduler(
        session,
        Options {
            exit_on_error: true,
            ..quiet_options()
        },
    );
    backend.push(0, ScriptedPoll::Error("bitstream damaged".to_string()));

    let outcome = scheduler.run();
    assert!(outcome.result.is_err());
    // a mid-run demuxer failure propagates its own code, not the setup one
    assert_eq!(
        transmux::error::resolve_exit_code(false, false, &outcome.result),
        transmux::error::exit_code::TRANSCODE_FAILED
    );
}

#[test]
fn filter_fed_output_drains_once_inputs_end() {
    let session = r#"{
        "filtergraphs": [{ "simple": true }],
        "inputs": [{
            "streams": [{
                "kind": "video",
                "decoding_needed": true,
                "filters": [{ "graph": 0, "input": 0 }]
            }],
            "packets": [
                { "stream": 0, "dts_us": 0, "key": true, "size": 10 },
                { "stream": 0, "dts_us": 33000, "size": 10 }
            ]
        }],
        "outputs": [{
            "streams": [{ "kind": "video", "filter": 0, "encoder": "h264" }]
        }]
    }"#;

    let (mut scheduler, backend) = build_scheduler(session, quiet_options());
    let outcome = scheduler.run();

    assert!(outcome.result.is_ok());
    assert!(backend.encoders_flushed());
    let ost = &scheduler.graph().outputs[0].streams[0];
    assert!(ost.encoder_finished());
    assert_eq!(scheduler.graph().inputs[0].streams[0].frames_decoded, 2);
    assert_eq!(backend.trailers(), vec![0]);
}

#[test]
fn two_outputs_interleave_by_presentation_time() {
    let session = r#"{
        "inputs": [
            {
                "streams": [{ "kind": "video" }],
                "packets": [
                    { "stream": 0, "dts_us": 0, "key": true, "size": 10 },
                    { "stream": 0, "dts_us": 100000, "size": 10 }
                ]
            },
            {
                "streams": [{ "kind": "video" }],
                "packets": [
                    { "stream": 0, "dts_us": 10000, "key": true, "size": 10 },
                    { "stream": 0, "dts_us": 20000, "size": 10 },
                    { "stream": 0, "dts_us": 30000, "size": 10 }
                ]
            }
        ],
        "outputs": [
            { "streams": [{ "kind": "video", "source": { "file": 0, "stream": 0 } }] },
            { "streams": [{ "kind": "video", "source": { "file": 1, "stream": 0 } }] }
        ]
    }"#;

    let (mut scheduler, backend) = build_scheduler(session, quiet_options());
    let outcome = scheduler.run();
    assert!(outcome.result.is_ok());

    // all five packets arrive, each output in its own demux order
    let events = backend.events();
    let per_output = |file: usize| -> Vec<i64> {
        events
            .iter()
            .filter_map(|e| match e {
                MuxEvent::Packet {
                    output: OutputStreamKey { file: f, .. },
                    dts: Some(dts),
                } if *f == file => Some(*dts),
                _ => None,
            })
            .collect()
    };
    assert_eq!(per_output(0), vec![0, 100_000]);
    assert_eq!(per_output(1), vec![10_000, 20_000, 30_000]);

    // the lagging output is serviced before the one that is ahead: after
    // file 0 reaches 100 ms, all of file 1's early packets go out before
    // anything else happens to output 0
    assert_eq!(backend.trailers(), vec![0, 1]);
    for key in scheduler.graph().output_streams() {
        assert!(scheduler.graph().ost(key).encoder_finished());
    }
}
