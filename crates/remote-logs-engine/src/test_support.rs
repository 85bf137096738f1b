//! Test doubles shared by the engine's unit tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use remote_logs_core::{
    Connector, EngineConfig, ExecOutput, HostProfile, HostRegistry, OutputStream, RemoteCommand,
    RemoteSession, TransportError,
};
use remote_logs_shell::LocalConnector;

use crate::LogEngine;

pub fn local_registry() -> HostRegistry {
    HostRegistry::new([HostProfile::local("local")]).unwrap()
}

pub fn local_engine(config: EngineConfig) -> (LogEngine, CountingConnector) {
    let connector = CountingConnector::local();
    let engine = LogEngine::new(local_registry(), Arc::new(connector.clone()), config);
    (engine, connector)
}

type ExecFn = dyn Fn(&RemoteCommand) -> Result<ExecOutput, TransportError> + Send + Sync;

/// One step of a scripted output stream.
#[derive(Debug, Clone)]
pub enum Chunk {
    Data(&'static str),
    Fail(&'static str),
}

/// Canned behaviour for [`ScriptedConnector`] sessions.
#[derive(Clone, Default)]
pub struct Script {
    pub exec: Option<Arc<ExecFn>>,
    pub chunks: Vec<Chunk>,
    /// Keep the stream open after the last chunk.
    pub hang: bool,
}

impl Script {
    pub fn exec<F>(mut self, f: F) -> Self
    where
        F: Fn(&RemoteCommand) -> Result<ExecOutput, TransportError> + Send + Sync + 'static,
    {
        self.exec = Some(Arc::new(f));
        self
    }
}

pub struct ScriptedConnector {
    script: Script,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, host: &HostProfile) -> Result<Box<dyn RemoteSession>, TransportError> {
        Ok(Box::new(ScriptedSession {
            host_key: host.key.clone(),
            script: self.script.clone(),
            open: true,
        }))
    }
}

struct ScriptedSession {
    host_key: String,
    script: Script,
    open: bool,
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    fn host_key(&self) -> &str {
        &self.host_key
    }

    async fn exec(&mut self, command: &RemoteCommand) -> Result<ExecOutput, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        match self.script.exec {
            Some(ref f) => f(command),
            None => Ok(ExecOutput::default()),
        }
    }

    async fn stream(&mut self, _command: &RemoteCommand) -> Result<OutputStream, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let items = self.script.chunks.clone().into_iter().map(|c| match c {
            Chunk::Data(s) => Ok(Bytes::from_static(s.as_bytes())),
            Chunk::Fail(msg) => Err(TransportError::Channel(msg.to_string())),
        });
        let head = futures::stream::iter(items);
        if self.script.hang {
            Ok(head.chain(futures::stream::pending()).boxed())
        } else {
            Ok(head.boxed())
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

struct FailingConnector;

#[async_trait]
impl Connector for FailingConnector {
    async fn connect(&self, _host: &HostProfile) -> Result<Box<dyn RemoteSession>, TransportError> {
        Err(TransportError::Auth("bad password".to_string()))
    }
}

/// Wraps a connector and counts sessions opened and closed.
#[derive(Clone)]
pub struct CountingConnector {
    inner: Arc<dyn Connector>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl CountingConnector {
    fn wrap(inner: Arc<dyn Connector>) -> Self {
        Self {
            inner,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn local() -> Self {
        Self::wrap(Arc::new(LocalConnector::new(Duration::from_secs(10))))
    }

    pub fn failing() -> Self {
        Self::wrap(Arc::new(FailingConnector))
    }

    pub fn scripted(script: Script) -> Self {
        Self::wrap(Arc::new(ScriptedConnector { script }))
    }

    pub fn open_sessions(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` sessions were closed.
    pub async fn wait_closed(&self, n: usize, within: Duration) {
        tokio::time::timeout(within, async {
            while self.closed.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("sessions were not closed in time");
    }
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, host: &HostProfile) -> Result<Box<dyn RemoteSession>, TransportError> {
        let inner = self.inner.connect(host).await?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingSession {
            inner,
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct CountingSession {
    inner: Box<dyn RemoteSession>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl RemoteSession for CountingSession {
    fn host_key(&self) -> &str {
        self.inner.host_key()
    }

    async fn exec(&mut self, command: &RemoteCommand) -> Result<ExecOutput, TransportError> {
        self.inner.exec(command).await
    }

    async fn stream(&mut self, command: &RemoteCommand) -> Result<OutputStream, TransportError> {
        self.inner.stream(command).await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn close(&mut self) {
        if self.inner.is_open() {
            self.inner.close().await;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
