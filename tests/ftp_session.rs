//! End-to-end sessions against a live server instance.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use rftpd::secure::SecureOptions;
use rftpd::server::{self, ServerConfig, ServerError};
use rftpd::shutdown::ShutdownFlag;

struct TestServer {
    port: u16,
    shutdown: ShutdownFlag,
    thread: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    fn start() -> Self {
        let port = free_port();
        let shutdown = ShutdownFlag::new();
        let flag = shutdown.clone();

        let thread = std::thread::spawn(move || {
            server::run_with_flag(
                ServerConfig {
                    port,
                    serve_root: PathBuf::from("."),
                    secure: SecureOptions::plain(),
                    worker_count: Some(2),
                },
                flag,
            )
        });

        let server = Self {
            port,
            shutdown,
            thread,
        };
        server.await_listening();
        server
    }

    fn connect(&self) -> BufReader<TcpStream> {
        let stream = TcpStream::connect(("127.0.0.1", self.port)).expect("connect to test server");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        BufReader::new(stream)
    }

    /// Requests shutdown and pokes the accept socket so the listener's poll
    /// wakes immediately instead of at the next liveness tick.
    fn stop(self) -> Result<(), ServerError> {
        self.shutdown.request();
        let _ = TcpStream::connect(("127.0.0.1", self.port));
        self.thread.join().expect("server thread must not panic")
    }

    fn await_listening(&self) {
        for _ in 0..100 {
            if TcpStream::connect(("127.0.0.1", self.port)).is_ok() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("server did not start listening on port {}", self.port);
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn read_line(client: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    client.read_line(&mut line).expect("read server reply");
    line
}

fn send(client: &mut BufReader<TcpStream>, line: &str) {
    client
        .get_mut()
        .write_all(line.as_bytes())
        .expect("write command");
}

#[test]
fn connect_and_quit() {
    let server = TestServer::start();

    {
        let mut client = server.connect();
        assert_eq!("220 Simple FTP Server\r\n", read_line(&mut client));

        send(&mut client, "QUIT\r\n");
        assert_eq!(
            "221 Service closing control connection\r\n",
            read_line(&mut client)
        );

        // The handler closes the descriptor after QUIT.
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    assert!(server.stop().is_ok());
}

#[test]
fn malformed_command_gets_500_and_the_connection_ends() {
    let server = TestServer::start();

    {
        let mut client = server.connect();
        assert_eq!("220 Simple FTP Server\r\n", read_line(&mut client));

        send(&mut client, "FOO BAR\r\n");
        assert_eq!(
            "500 Request couldn't be parsed, it was malformed!\r\n",
            read_line(&mut client)
        );

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    assert!(server.stop().is_ok());
}

#[test]
fn command_sequence_is_answered_in_order() {
    let server = TestServer::start();

    {
        let mut client = server.connect();
        assert_eq!("220 Simple FTP Server\r\n", read_line(&mut client));

        send(&mut client, "NOOP\r\n");
        assert_eq!("200 Command okay\r\n", read_line(&mut client));

        send(&mut client, "SYST\r\n");
        assert_eq!("215 UNIX Type: L8\r\n", read_line(&mut client));

        send(&mut client, "TYPE I\r\n");
        assert_eq!("200 Type set to I\r\n", read_line(&mut client));

        send(&mut client, "PORT 192,168,1,2,7,208\r\n");
        assert_eq!("200 PORT command successful\r\n", read_line(&mut client));

        send(&mut client, "DELE gone.txt\r\n");
        assert_eq!("502 DELE not implemented\r\n", read_line(&mut client));

        send(&mut client, "QUIT\r\n");
        assert_eq!(
            "221 Service closing control connection\r\n",
            read_line(&mut client)
        );
    }

    assert!(server.stop().is_ok());
}

#[test]
fn commands_split_across_writes_still_parse() {
    let server = TestServer::start();

    {
        let mut client = server.connect();
        assert_eq!("220 Simple FTP Server\r\n", read_line(&mut client));

        send(&mut client, "NO");
        std::thread::sleep(Duration::from_millis(50));
        send(&mut client, "OP\r");
        std::thread::sleep(Duration::from_millis(50));
        send(&mut client, "\nQUIT\r\n");

        assert_eq!("200 Command okay\r\n", read_line(&mut client));
        assert_eq!(
            "221 Service closing control connection\r\n",
            read_line(&mut client)
        );
    }

    assert!(server.stop().is_ok());
}

#[test]
fn shutdown_waits_for_the_in_flight_connection() {
    let server = TestServer::start();

    let mut client = server.connect();
    assert_eq!("220 Simple FTP Server\r\n", read_line(&mut client));

    // Shutdown with the session still open: the listener leaves, the main
    // thread blocks draining this connection's handle.
    let stopper = {
        let shutdown = server.shutdown.clone();
        let port = server.port;
        std::thread::spawn(move || {
            shutdown.request();
            let _ = TcpStream::connect(("127.0.0.1", port));
        })
    };
    stopper.join().unwrap();
    std::thread::sleep(Duration::from_millis(100));

    // The held session still works, then releases the drain.
    send(&mut client, "NOOP\r\n");
    assert_eq!("200 Command okay\r\n", read_line(&mut client));
    send(&mut client, "QUIT\r\n");
    assert_eq!(
        "221 Service closing control connection\r\n",
        read_line(&mut client)
    );
    drop(client);

    assert!(server.thread.join().expect("server thread").is_ok());
}
