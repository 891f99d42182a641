use piped_streams::{
    DeleteOnCloseReader, Executor, MeteredReader, MeteredWriter, SinkReader, StringReader, Task,
};
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn simple_string_out_to_in() -> anyhow::Result<()> {
    let mut reader = SinkReader::new(|sink| {
        for &byte in b"test" {
            sink.write_all(&[byte])?;
        }
        Ok(())
    });

    let mut buf = [0_u8; 1024];
    let mut collected = Vec::new();
    loop {
        match reader.read(&mut buf)? {
            0 => break,
            n => collected.extend_from_slice(&buf[..n]),
        }
    }
    assert_eq!(collected, b"test");
    reader.close()?;
    Ok(())
}

#[test]
fn round_trip_any_chunk_size() -> anyhow::Result<()> {
    let payload: Vec<u8> = (0_u32..100_000).map(|i| (i % 251) as u8).collect();

    for chunk_size in [1, 7, 512, 8192] {
        let expected = payload.clone();
        let to_write = payload.clone();
        let mut reader = SinkReader::new(move |sink| sink.write_all(&to_write));
        assert_eq!(consume_in(&mut reader, chunk_size)?, expected);
        reader.close()?;
    }
    Ok(())
}

#[test]
fn round_trip_through_tiny_buffer() -> anyhow::Result<()> {
    // A capacity far smaller than the payload forces the writer to block on
    // a full buffer over and over; order must still be preserved.
    let payload: Vec<u8> = (0_u32..10_000).map(|i| (i % 241) as u8).collect();
    let expected = payload.clone();
    let mut reader = SinkReader::with_capacity(64, move |sink| sink.write_all(&payload));
    assert_eq!(consume_in(&mut reader, 3)?, expected);
    reader.close()?;
    Ok(())
}

#[test]
fn exception_propagation() {
    let mut reader = SinkReader::new(|_sink| {
        Err(io::Error::new(
            io::ErrorKind::Other,
            "propagate this exception",
        ))
    });

    let err = consume_in(&mut reader, 1024).unwrap_err();
    assert!(
        err.to_string().ends_with("propagate this exception"),
        "unexpected message: {err}"
    );
    let cause = err.get_ref().expect("propagated failure carries its cause");
    assert_eq!(cause.to_string(), "propagate this exception");
}

#[test]
fn failure_after_some_bytes_reported_once() -> anyhow::Result<()> {
    let mut reader = SinkReader::new(|sink| {
        sink.write_all(b"abc")?;
        Err(io::Error::new(io::ErrorKind::Other, "boom"))
    });

    let err = consume_in(&mut reader, 1024).unwrap_err();
    assert!(err.to_string().contains("boom"));

    // The same failure must not surface a second time from close().
    reader.close()?;
    reader.close()?;
    Ok(())
}

#[test]
fn writer_finishes_before_reader() -> anyhow::Result<()> {
    let (done_tx, done_rx) = mpsc::channel();
    let mut reader = SinkReader::new(move |sink| {
        sink.write_all(&[7])?;
        sink.close();
        done_tx.send(()).unwrap();
        Ok(())
    });

    // The first read starts the writer and returns its one byte.
    let mut byte = [0_u8; 1];
    reader.read_exact(&mut byte)?;
    assert_eq!(byte[0], 7);

    // Wait until the writer has closed its end and finished.
    done_rx.recv_timeout(Duration::from_secs(2))?;

    assert_eq!(reader.read(&mut byte)?, 0);
    reader.close()?;
    Ok(())
}

#[test]
fn close_without_reading() -> anyhow::Result<()> {
    let mut reader = SinkReader::new(|_sink| Ok(()));
    reader.close()?;
    reader.close()?;
    Ok(())
}

#[test]
fn read_after_close_fails() -> anyhow::Result<()> {
    let mut reader = SinkReader::new(|sink| sink.write_all(b"x"));
    reader.close()?;
    assert!(reader.read(&mut [0_u8; 4]).is_err());
    Ok(())
}

#[test]
fn reader_closes_before_writer_finished() -> anyhow::Result<()> {
    let (release_tx, release_rx) = mpsc::channel();
    let (err_tx, err_rx) = mpsc::channel();
    let mut reader = SinkReader::new(move |sink| {
        sink.write_all(&[1])?;
        // Hold the second write until the reader has closed its end.
        release_rx.recv().unwrap();
        let err = sink.write_all(&[2]).unwrap_err();
        err_tx.send(err).unwrap();
        Ok(())
    });

    let mut byte = [0_u8; 1];
    reader.read_exact(&mut byte)?;
    assert_eq!(byte[0], 1);

    // close() must return promptly even though the writer is parked.
    reader.close()?;
    release_tx.send(()).unwrap();

    let err = err_rx.recv_timeout(Duration::from_secs(2))?;
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    assert_eq!(err.to_string(), "pipe closed");
    Ok(())
}

#[test]
fn panicking_writer_surfaces_as_error() {
    let mut reader = SinkReader::new(|_sink| -> io::Result<()> { panic!("kaboom") });
    let err = consume_in(&mut reader, 1024).unwrap_err();
    assert!(err.to_string().contains("writer task panicked"));
    assert!(err.to_string().contains("kaboom"));
}

#[test]
fn shared_pool_executor() -> anyhow::Result<()> {
    let pool = WorkerPool::spawn();

    for text in ["first payload", "second payload"] {
        let mut reader = SinkReader::with_executor(pool.clone(), 16, move |sink| {
            sink.write_all(text.as_bytes())
        });
        assert_eq!(consume_in(&mut reader, 5)?, text.as_bytes());
        reader.close()?;
    }
    Ok(())
}

#[test]
fn sink_reader_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<SinkReader>();
}

#[test]
fn string_reader_contents_and_length() -> anyhow::Result<()> {
    let mut reader = StringReader::new("piped");
    assert_eq!(reader.len(), 5);
    assert!(!reader.is_empty());

    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    assert_eq!(text, "piped");

    // Seeking back re-reads already consumed bytes.
    reader.seek(SeekFrom::Start(1))?;
    text.clear();
    reader.read_to_string(&mut text)?;
    assert_eq!(text, "iped");

    let empty = StringReader::new("");
    assert_eq!(empty.len(), 0);
    assert!(empty.is_empty());
    Ok(())
}

#[test]
fn metered_reader_counts_bytes() -> anyhow::Result<()> {
    let mut reader = MeteredReader::new(StringReader::new("hello world"));
    assert_eq!(reader.total_bytes(), 0);
    assert_eq!(reader.bytes_per_sec(), 0);

    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    assert_eq!(text, "hello world");
    assert_eq!(reader.total_bytes(), 11);
    assert!(reader.bytes_per_sec() > 0);
    Ok(())
}

#[test]
fn metered_reader_counts_skipped_bytes() -> anyhow::Result<()> {
    let mut reader = MeteredReader::new(StringReader::new("0123456789"));
    io::copy(&mut reader.by_ref().take(4), &mut io::sink())?;
    assert_eq!(reader.total_bytes(), 4);

    let mut rest = String::new();
    reader.read_to_string(&mut rest)?;
    assert_eq!(rest, "456789");
    assert_eq!(reader.total_bytes(), 10);
    Ok(())
}

#[test]
fn metered_writer_counts_bytes() -> anyhow::Result<()> {
    let mut writer = MeteredWriter::new(Vec::new());
    assert_eq!(writer.total_bytes(), 0);
    assert_eq!(writer.bytes_per_sec(), 0);

    writer.write_all(b"0123456789")?;
    writer.flush()?;
    assert_eq!(writer.total_bytes(), 10);
    assert!(writer.bytes_per_sec() > 0);
    assert_eq!(writer.get_ref().as_slice(), b"0123456789");

    let inner = writer.into_inner();
    assert_eq!(inner.len(), 10);
    Ok(())
}

#[test]
fn metered_sink_reader_composes() -> anyhow::Result<()> {
    let mut reader = SinkReader::new(|sink| {
        let mut metered = MeteredWriter::new(sink);
        metered.write_all(b"measured")?;
        assert_eq!(metered.total_bytes(), 8);
        Ok(())
    });
    assert_eq!(consume_in(&mut reader, 1024)?, b"measured");
    reader.close()?;
    Ok(())
}

#[test]
fn delete_on_close_removes_file_on_drop() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("payload.bin");
    fs::write(&path, b"ephemeral")?;

    let mut reader = DeleteOnCloseReader::open(&path)?;
    let mut contents = Vec::new();
    reader.read_to_end(&mut contents)?;
    assert_eq!(contents, b"ephemeral");
    assert!(path.exists());

    drop(reader);
    assert!(!path.exists());
    Ok(())
}

#[test]
fn delete_on_close_explicit_close() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("payload.bin");
    fs::write(&path, b"ephemeral")?;

    let mut reader = DeleteOnCloseReader::open(&path)?;
    assert_eq!(reader.path(), path.as_path());

    let mut partial = [0_u8; 4];
    reader.read_exact(&mut partial)?;
    assert_eq!(&partial, b"ephe");

    reader.close()?;
    assert!(!path.exists());
    reader.close()?;
    assert!(reader.read(&mut partial).is_err());
    Ok(())
}

/// Read `reader` to end-of-stream in `chunk_size`-byte slices.
fn consume_in(reader: &mut impl Read, chunk_size: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0_u8; chunk_size];
    let mut collected = Vec::new();
    loop {
        match reader.read(&mut buf)? {
            0 => return Ok(collected),
            n => collected.extend_from_slice(&buf[..n]),
        }
    }
}

/// A single worker thread draining a queue of tasks, shared by several
/// streams through `Arc`.
struct WorkerPool {
    sender: Mutex<mpsc::Sender<Task>>,
}

impl WorkerPool {
    fn spawn() -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        thread::spawn(move || {
            for task in receiver {
                task();
            }
        });
        Arc::new(Self {
            sender: Mutex::new(sender),
        })
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Task) -> io::Result<()> {
        self.sender
            .lock()
            .unwrap()
            .send(task)
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "worker pool shut down"))
    }
}
