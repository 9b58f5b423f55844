//! Supervisor de workers – threads nomeadas com reinício automático.
//!
//! Cada operação longa ou de I/O (escuta do rádio, consultas aos relés,
//! SMS, e-mail, chamadas) roda como um worker nomeado. O supervisor mantém
//! um registro explícito `id → worker vivo` protegido por mutex:
//!
//! - workers `restart_on_exit` (ou `exclusive`) são únicos por nome; a
//!   verificação e o registro acontecem sob o mesmo lock
//! - erros e panics do corpo do worker nunca chegam ao chamador
//! - ao terminar, workers `restart_on_exit` voltam para a fila de reinício,
//!   consumida pelo monitor com um intervalo fixo entre reinícios

use crate::config::SupervisorConfig;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Nome do worker que consome a fila de reinício.
pub const MONITOR_WORKER_NAME: &str = "Thread monitor";

/// Erro devolvido pelo corpo de um worker.
pub type WorkerError = Box<dyn std::error::Error + Send + Sync>;

pub type WorkResult = Result<(), WorkerError>;

type WorkFn = Arc<dyn Fn(&WorkerContext) -> WorkResult + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&WorkerError) + Send + Sync>;

// ──────────────────────────────────────────────
// Cancelamento
// ──────────────────────────────────────────────

/// Flag de cancelamento cooperativo. Quem cria o worker cancela; o worker
/// apenas observa.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ──────────────────────────────────────────────
// Definição do worker
// ──────────────────────────────────────────────

/// Contexto entregue ao corpo do worker.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub name: String,
    pub cancel: CancelToken,
}

impl WorkerContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Unidade de trabalho nomeada.
#[derive(Clone)]
pub struct WorkerSpec {
    name: String,
    restart_on_exit: bool,
    exclusive: bool,
    work: WorkFn,
    on_error: Option<ErrorHook>,
}

impl WorkerSpec {
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn(&WorkerContext) -> WorkResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            restart_on_exit: false,
            exclusive: false,
            work: Arc::new(work),
            on_error: None,
        }
    }

    /// Reinicia o worker quando ele termina (implica nome único).
    pub fn restart_on_exit(mut self) -> Self {
        self.restart_on_exit = true;
        self
    }

    /// Não inicia se já existir um worker vivo com o mesmo nome.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Substitui o log padrão quando o corpo falha.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkerError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn is_unique(&self) -> bool {
        self.restart_on_exit || self.exclusive
    }
}

impl std::fmt::Debug for WorkerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSpec")
            .field("name", &self.name)
            .field("restart_on_exit", &self.restart_on_exit)
            .field("exclusive", &self.exclusive)
            .finish_non_exhaustive()
    }
}

/// Handle devolvido por [`Supervisor::start`].
#[derive(Debug)]
pub struct WorkerHandle {
    pub id: u64,
    pub name: String,
    pub cancel: CancelToken,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Espera o worker terminar.
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("Thread do worker {} terminou com panic", self.name);
        }
    }
}

/// Registro de um worker vivo.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub id: u64,
    pub name: String,
    pub restart_on_exit: bool,
    pub cancel: CancelToken,
    pub started_at: DateTime<Utc>,
}

// ──────────────────────────────────────────────
// Supervisor
// ──────────────────────────────────────────────

struct Inner {
    live: Mutex<HashMap<u64, WorkerInfo>>,
    next_id: AtomicU64,
    restart_tx: Sender<WorkerSpec>,
    restart_rx: Receiver<WorkerSpec>,
    restart_failed_workers: bool,
    restart_pacing: Duration,
    shutting_down: AtomicBool,
}

/// Estado de processo compartilhado pelos componentes: criado no boot,
/// encerrado com [`Supervisor::shutdown`].
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(config: &SupervisorConfig) -> Self {
        let (restart_tx, restart_rx) = unbounded();
        Self {
            inner: Arc::new(Inner {
                live: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                restart_tx,
                restart_rx,
                restart_failed_workers: config.restart_failed_workers,
                restart_pacing: config.restart_pacing(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    fn live(&self) -> MutexGuard<'_, HashMap<u64, WorkerInfo>> {
        self.inner.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inicia um worker. Retorna `None` se o nome é único e já existe um
    /// worker vivo com ele, ou se a thread não pôde ser criada.
    pub fn start(&self, spec: WorkerSpec) -> Option<WorkerHandle> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelToken::new();
        {
            let mut live = self.live();
            if spec.is_unique() && live.values().any(|w| w.name == spec.name) {
                info!("Não é possível iniciar o worker, já em execução: {}", spec.name);
                return None;
            }
            live.insert(
                id,
                WorkerInfo {
                    id,
                    name: spec.name.clone(),
                    restart_on_exit: spec.restart_on_exit,
                    cancel: cancel.clone(),
                    started_at: Utc::now(),
                },
            );
        }

        trace!("Iniciando worker {}", spec.name);
        let name = spec.name.clone();
        let supervisor = self.clone();
        let ctx = WorkerContext {
            name: name.clone(),
            cancel: cancel.clone(),
        };
        let spawned = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || supervisor.run(id, spec, ctx));

        match spawned {
            Ok(thread) => Some(WorkerHandle {
                id,
                name,
                cancel,
                thread,
            }),
            Err(e) => {
                error!("Falha ao criar thread para o worker {name}: {e}");
                self.live().remove(&id);
                None
            }
        }
    }

    fn run(&self, id: u64, spec: WorkerSpec, ctx: WorkerContext) {
        trace!("Worker {} iniciado", spec.name);
        {
            let _registration = Registration { supervisor: self, id };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (spec.work)(&ctx)))
                .unwrap_or_else(|payload| Err(panic_message(payload).into()));

            if let Err(e) = outcome {
                match &spec.on_error {
                    Some(hook) => hook(&e),
                    None => error!("Erro no worker {}: {e}", spec.name),
                }
            }
        }

        if spec.restart_on_exit {
            self.request_restart(spec);
        }
    }

    fn request_restart(&self, spec: WorkerSpec) {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            debug!("Encerrando, worker {} não será reiniciado", spec.name);
        } else if self.inner.restart_failed_workers {
            info!("Worker {} colocado na fila de reinício", spec.name);
            // O receiver vive em `inner`, o envio não falha
            let _ = self.inner.restart_tx.send(spec);
        } else {
            info!(
                "Worker {} não será reiniciado. Verifique supervisor.restart_failed_workers",
                spec.name
            );
        }
    }

    /// Inicia o monitor que consome a fila de reinício.
    pub fn start_monitor(&self) -> Option<WorkerHandle> {
        let supervisor = self.clone();
        self.start(
            WorkerSpec::new(MONITOR_WORKER_NAME, move |ctx| {
                supervisor.monitor_loop(ctx);
                Ok(())
            })
            .restart_on_exit(),
        )
    }

    fn monitor_loop(&self, ctx: &WorkerContext) {
        while !ctx.is_cancelled() {
            trace!("Aguardando workers para reiniciar");
            match self.inner.restart_rx.recv_timeout(Duration::from_secs(1)) {
                Ok(spec) => {
                    info!("Reiniciando worker {}", spec.name);
                    self.start(spec);
                    std::thread::sleep(self.inner.restart_pacing);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// `true` se existe um worker vivo com `name`.
    pub fn any_live_by_name(&self, name: &str) -> bool {
        self.live().values().any(|w| w.name == name)
    }

    /// Registro do worker vivo com `name` (o mais antigo, se houver vários).
    pub fn get_by_name(&self, name: &str) -> Option<WorkerInfo> {
        self.live()
            .values()
            .filter(|w| w.name == name)
            .min_by_key(|w| w.id)
            .cloned()
    }

    /// Nomes dos workers vivos que começam com `prefix`.
    pub fn live_names_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .live()
            .values()
            .filter(|w| w.name.starts_with(prefix))
            .map(|w| w.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn live_count(&self) -> usize {
        self.live().len()
    }

    /// Cancela todos os workers vivos e desliga os reinícios.
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        for worker in self.live().values() {
            worker.cancel.cancel();
        }
        info!("Supervisor encerrado");
    }
}

/// Remove o worker do registro quando o corpo termina, mesmo com panic.
struct Registration<'a> {
    supervisor: &'a Supervisor,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.supervisor.live().remove(&self.id);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".into()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
