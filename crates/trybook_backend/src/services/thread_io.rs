use std::io::{BufReader, Read};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

pub(super) fn spawn_read_to_string<R: Read + Send + 'static>(input: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let mut reader = BufReader::new(input);
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).to_string()
    })
}

/// Forwards raw reads from `input` as they arrive. The thread ends at EOF or
/// once the receiving side is gone.
pub(super) fn spawn_forward_chunks<R: Read + Send + 'static>(
    input: R,
    tx: mpsc::Sender<Vec<u8>>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut input = input;
        let mut buf = [0u8; 4096];
        loop {
            match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    })
}
