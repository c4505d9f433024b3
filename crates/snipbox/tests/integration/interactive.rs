use snipbox::job::Action;
use snipbox::report::Section;
use snipbox::runner::{JobContext, Runner};
use snipbox::toolchain::OutputStream;
use tokio::sync::mpsc;

use super::{fixture_job, test_config};

#[tokio::test]
#[ignore = "requires ptrace"]
async fn test_debug_streams_backtrace() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));
    let (output, mut chunks) = mpsc::channel(256);

    let report = runner
        .run_job(
            &fixture_job("segfault.c", Action::Debug),
            JobContext::streaming(output, None),
        )
        .await
        .unwrap();

    let mut streamed = String::new();
    while let Ok(chunk) = chunks.try_recv() {
        assert_eq!(chunk.stream, OutputStream::Debug);
        streamed.push_str(&chunk.data);
    }
    assert!(streamed.contains("SIGSEGV"));
    assert!(
        report
            .sections
            .iter()
            .any(|section| matches!(section, Section::Debug { text } if text.contains("main")))
    );
}

#[tokio::test]
#[ignore = "requires ptrace"]
async fn test_trace_forwards_input() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));
    let (output, mut chunks) = mpsc::channel(1024);
    let (input, input_rx) = mpsc::channel(4);
    input.send(b"hello\n".to_vec()).await.unwrap();
    drop(input);

    let report = runner
        .run_job(
            &fixture_job("echo_line.c", Action::Trace),
            JobContext::streaming(output, Some(input_rx)),
        )
        .await
        .unwrap();

    let mut saw_trace = false;
    while let Ok(chunk) = chunks.try_recv() {
        saw_trace |= chunk.stream == OutputStream::Trace;
    }
    assert!(saw_trace);
    assert!(
        report
            .sections
            .iter()
            .any(|section| matches!(section, Section::ProgramOutput { text } if text == "got hello\n"))
    );
}
