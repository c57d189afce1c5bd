//! Asynchronous server side of the protocol.
//!
//! Each accepted connection gets its own task running [`dispatch`], which
//! owns the [`Session`] of that connection. Commands are served strictly one
//! after another: a reply is completely written and flushed before the next
//! header is read.
//!
//! Failures of the filesystem operation a command asks for are reported to
//! the client with that command's failure reply. Anything else (unknown
//! opcode, missing handle, oversized transfer, broken socket or handle) ends
//! the connection.

use {
    crate::{
        config::ServerConfig,
        error::Error,
        listing,
        path::Root,
        serialize::{self, Encodable},
        session::{DirCursor, Session},
        transfer,
        utils::{Result, signed_size},
        wire::*,
    },
    log::{debug, error, info, warn},
    std::{future::Future, io, path::PathBuf},
    tokio::{
        fs::{self, File},
        io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter},
        net::{TcpListener, TcpSocket},
        signal::unix::{SignalKind, signal},
    },
};

fn show(raw: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(raw)
}

struct Connection<R, W: AsyncWrite> {
    reader: R,
    writer: BufWriter<W>,
    session: Session,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Read the next header; `None` once the peer has closed the stream.
    async fn read_command(&mut self) -> Result<Option<Command>> {
        let mut raw = [0u8; Command::SIZE];
        match self.reader.read_exact(&mut raw).await {
            Ok(_) => Ok(Some(serialize::read_command(&mut &raw[..])?)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_path(&mut self, size: u16) -> Result<Vec<u8>> {
        let mut raw = vec![0; size as usize];
        self.reader.read_exact(&mut raw).await?;
        Ok(raw)
    }

    async fn send<T: Encodable>(&mut self, reply: &T) -> Result<()> {
        serialize::send(&mut self.writer, reply).await?;
        Ok(())
    }

    async fn send_status(&mut self, result: Result<()>, what: &str, raw: &[u8]) -> Result<()> {
        let status = match result {
            Ok(()) => STATUS_OK,
            Err(e) => {
                warn!("{} {:?}: {}", what, show(raw), e);
                STATUS_FAILED
            }
        };
        self.send(&status).await
    }

    async fn resolve(&self, raw: &[u8]) -> Result<PathBuf> {
        self.session.root().resolve(raw).await
    }

    /// Like `resolve`, refusing the root itself.
    async fn resolve_below(&self, raw: &[u8]) -> Result<PathBuf> {
        self.session.root().resolve_below(raw).await
    }

    #[rustfmt::skip]
    async fn dispatch_once(&mut self, cmd: Command) -> Result<()> {
        use crate::CommandCode::*;

        let code = cmd.command_code()?;
        let raw = if code.takes_path() {
            self.read_path(cmd.size).await?
        } else {
            Vec::new()
        };
        debug!("\t← {:?} size={} count={} offset={:#x} {:?}", code, cmd.size, cmd.count, cmd.offset, show(&raw));

        match code {
            OpenFileForReading      => self.open_file_for_reading(&raw).await,
            ReadFile                => self.read_file(&cmd).await,
            CustomReadFile          => self.custom_read_file(&cmd).await,
            ReadShortFile           => self.read_short_file(&cmd).await,
            OpenFileForWriting      => self.open_file_for_writing(&raw).await,
            WriteToFile             => self.write_to_file(&cmd).await,
            OpenDirectory           => self.open_directory(&raw).await,
            ListDirectoryEntryShort => self.list_directory_entry_short().await,
            DeleteFile              => self.delete_file(&raw).await,
            MakeDirectory           => self.make_directory(&raw).await,
            RemoveDirectory         => self.remove_directory(&raw).await,
            ListDirectoryEntryLong  => self.list_directory_entry_long().await,
            GetFileStats            => self.get_file_stats(&raw).await,
            GetDirectorySize        => self.get_directory_size(&raw).await,
            GetDirectoryContents    => self.get_directory_contents().await,
        }
    }

    async fn open_file_for_reading(&mut self, raw: &[u8]) -> Result<()> {
        self.session.close_read();

        let reply = match self.try_open_read(raw).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("open for reading {:?}: {}", show(raw), e);
                OpenReadReply::FAILED
            }
        };
        self.send(&reply).await
    }

    async fn try_open_read(&mut self, raw: &[u8]) -> Result<OpenReadReply> {
        let path = self.resolve(raw).await?;
        let file = File::open(&path).await?;
        let attr = file.metadata().await?;
        if attr.is_dir() {
            return Err(crate::io_err!(IsADirectory, "cannot read a directory").into());
        }

        self.session.set_read(file);
        Ok(OpenReadReply {
            size: signed_size(attr.len()),
            mtime: Times::from(&attr).mtime,
        })
    }

    async fn get_file_stats(&mut self, raw: &[u8]) -> Result<()> {
        let stat = async {
            let path = self.resolve(raw).await?;
            Ok::<_, Error>(FileStatReply::from(&fs::metadata(&path).await?))
        };

        let reply = match stat.await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("stat {:?}: {}", show(raw), e);
                FileStatReply::FAILED
            }
        };
        self.send(&reply).await
    }

    async fn read_file(&mut self, cmd: &Command) -> Result<()> {
        let (file, buffer) = self.session.read_parts()?;
        transfer::read_file(file, buffer, cmd.offset, cmd.count, &mut self.writer).await
    }

    async fn custom_read_file(&mut self, cmd: &Command) -> Result<()> {
        let req = cmd.sector_read();
        let (file, buffer) = self.session.read_parts()?;
        transfer::read_sectors(file, buffer, req, &mut self.writer).await?;
        debug!("custom read of {} sectors from sector {} done", req.chunks, req.first);
        Ok(())
    }

    async fn read_short_file(&mut self, cmd: &Command) -> Result<()> {
        let (file, buffer) = self.session.read_parts()?;
        transfer::read_short(file, buffer, cmd.offset, cmd.count, &mut self.writer).await
    }

    async fn open_file_for_writing(&mut self, raw: &[u8]) -> Result<()> {
        self.session.close_write();

        let opened = async {
            let path = self.resolve(raw).await?;
            Ok::<_, Error>(File::create(&path).await?)
        };
        let result = match opened.await {
            Ok(file) => {
                self.session.set_write(file);
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.send_status(result, "open for writing", raw).await
    }

    async fn write_to_file(&mut self, cmd: &Command) -> Result<()> {
        let (file, buffer) = self.session.write_parts()?;
        let written = transfer::write_file(file, buffer, cmd.count, &mut self.reader).await?;
        self.send(&written).await
    }

    async fn delete_file(&mut self, raw: &[u8]) -> Result<()> {
        let result = async {
            let path = self.resolve_below(raw).await?;
            Ok::<_, Error>(fs::remove_file(&path).await?)
        }
        .await;
        self.send_status(result, "delete", raw).await
    }

    async fn make_directory(&mut self, raw: &[u8]) -> Result<()> {
        let result = async {
            let path = self.resolve_below(raw).await?;
            Ok::<_, Error>(fs::create_dir(&path).await?)
        }
        .await;
        self.send_status(result, "mkdir", raw).await
    }

    async fn remove_directory(&mut self, raw: &[u8]) -> Result<()> {
        let result = async {
            let path = self.resolve_below(raw).await?;
            Ok::<_, Error>(fs::remove_dir(&path).await?)
        }
        .await;
        self.send_status(result, "rmdir", raw).await
    }

    async fn get_directory_size(&mut self, raw: &[u8]) -> Result<()> {
        let total = async {
            let path = self.resolve(raw).await?;
            Ok::<_, Error>(listing::directory_size(path).await?)
        };

        let reply = match total.await {
            Ok(total) => total,
            Err(e) => {
                warn!("directory size {:?}: {}", show(raw), e);
                u64::MAX
            }
        };
        self.send(&reply).await
    }

    /// A failed open keeps whatever directory was open before.
    async fn open_directory(&mut self, raw: &[u8]) -> Result<()> {
        let entries = async {
            let path = self.resolve(raw).await?;
            Ok::<_, Error>(listing::read_entries(&path).await?)
        };

        let result = match entries.await {
            Ok(entries) => {
                self.session.set_directory(DirCursor::open(entries));
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.send_status(result, "open directory", raw).await
    }

    async fn get_directory_contents(&mut self) -> Result<()> {
        let entries = self.session.directory()?.drain_remaining();
        let reply = listing::batch(self.session.root(), &entries).await;
        debug!("listing {} of {} entries", reply.entries.len(), entries.len());
        self.send(&reply).await
    }

    async fn list_directory_entry_short(&mut self) -> Result<()> {
        let next = self.session.directory()?.take_next();
        let reply = match next {
            None => {
                self.session.directory()?.close();
                ShortEntryReply::sentinel()
            }
            Some(entry) => listing::short_entry(self.session.root(), &entry)
                .await
                .unwrap_or_else(|e| {
                    warn!("listing {:?}: {}", entry.path, e);
                    ShortEntryReply::sentinel()
                }),
        };
        self.send(&reply).await
    }

    async fn list_directory_entry_long(&mut self) -> Result<()> {
        let next = self.session.directory()?.take_next();
        let reply = match next {
            None => {
                self.session.directory()?.close();
                LongEntryReply::sentinel()
            }
            Some(entry) => listing::long_entry(self.session.root(), &entry)
                .await
                .unwrap_or_else(|e| {
                    warn!("listing {:?}: {}", entry.path, e);
                    LongEntryReply::sentinel()
                }),
        };
        self.send(&reply).await
    }
}

/// Serve one connection until the peer disconnects or a fatal error occurs.
///
/// A clean disconnect between two commands (or in the middle of a header)
/// returns `Ok`. The session, with every handle it holds, is dropped on
/// return.
pub async fn dispatch<Reader, Writer>(session: Session, reader: Reader, writer: Writer) -> Result<()>
where
    Reader: AsyncRead + Unpin,
    Writer: AsyncWrite + Unpin,
{
    let mut conn = Connection {
        reader,
        writer: BufWriter::new(writer),
        session,
    };
    debug!("session buffer: {} bytes", conn.session.buffer_size());

    while let Some(cmd) = conn.read_command().await? {
        conn.dispatch_once(cmd).await?;
        conn.writer.flush().await?;
    }

    Ok(())
}

/// Create the listening socket described by `config`.
pub fn bind(config: &ServerConfig) -> io::Result<TcpListener> {
    let socket = if config.addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(config.addr)?;
    socket.listen(config.backlog)
}

/// Resolve once SIGINT, SIGQUIT or SIGTERM arrives.
///
/// The handlers are installed when this is called, so a failure to install
/// them surfaces before the server starts.
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
            _ = sigquit.recv() => info!("Received SIGQUIT, shutting down"),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
    })
}

/// Accept connections on `listener` until `shutdown` resolves.
///
/// Every admitted peer is served by its own detached task; sessions still
/// running at shutdown are not waited for.
pub async fn serve<F>(listener: TcpListener, root: Root, config: ServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    info!("Serving {:?} on {}", root.path(), listener.local_addr()?);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept client: {}", e);
                        continue;
                    }
                };

                if let Some(whitelist) = &config.whitelist {
                    if !whitelist.allows(peer.ip()) {
                        warn!("Rejected {}: not in whitelist {}", peer, whitelist);
                        continue;
                    }
                }

                info!("Connection from {}", peer);
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("{}: failed to set TCP_NODELAY: {}", peer, e);
                }

                let session = Session::new(root.clone(), config.buffer_size);
                tokio::spawn(async move {
                    let (readhalf, writehalf) = stream.into_split();
                    match dispatch(session, readhalf, writehalf).await {
                        Ok(()) => info!("{} disconnected", peer),
                        Err(e) if e.is_disconnect() => info!("{} disconnected: {}", peer, e),
                        Err(e) => error!("{}: closing connection: {}", peer, e),
                    }
                });
            }
            _ = &mut shutdown => {
                info!("Server shutdown complete");
                return Ok(());
            }
        }
    }
}

/// Bind according to `config` and serve `root` until a termination signal.
pub async fn srv_async(root: Root, config: ServerConfig) -> Result<()> {
    let shutdown = shutdown_signal()?;
    let listener = bind(&config)?;
    serve(listener, root, config, shutdown).await
}
