//! Central de chamadas – SMS e chamadas telefônicas.
//!
//! Cada chamada roda como um worker exclusivo chamado `"Calling {número}"`:
//! o nome é a chave de deduplicação, então só existe uma chamada em curso
//! por número. O cancelamento usa o token do próprio worker e é observado
//! a cada tick de polling.

use crate::config::{CallConfig, SmsConfig};
use crate::supervisor::{Supervisor, WorkerContext, WorkerSpec};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Prefixo do nome dos workers de chamada.
pub const CALL_WORKER_PREFIX: &str = "Calling ";

pub fn call_worker_name(phone: &str) -> String {
    format!("{CALL_WORKER_PREFIX}{phone}")
}

#[derive(Debug, thiserror::Error)]
pub enum TelephonyError {
    #[error("Falha de transporte: {0}")]
    Http(String),

    #[error("API respondeu {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Canal desativado: {0}")]
    Disabled(&'static str),
}

/// Status de uma chamada no provedor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Queued,
    Initiated,
    Ringing,
    InProgress,
    Canceled,
    Completed,
    Busy,
    NoAnswer,
    Failed,
    #[serde(other)]
    Unknown,
}

impl CallStatus {
    /// Chamada atendida ou encerrada do outro lado.
    pub fn is_reached(self) -> bool {
        matches!(self, Self::Canceled | Self::Completed | Self::InProgress)
    }

    /// Chamada não atendida; vale nova tentativa.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Busy | Self::NoAnswer | Self::Failed)
    }
}

/// Provedor de chamadas.
pub trait Telephony: Send + Sync {
    /// Inicia uma chamada e retorna o identificador dela.
    fn place_call(&self, to: &str) -> Result<String, TelephonyError>;
    fn call_status(&self, call_id: &str) -> Result<CallStatus, TelephonyError>;
    /// Encerra a chamada do lado do provedor.
    fn complete_call(&self, call_id: &str) -> Result<(), TelephonyError>;
}

pub trait SmsGateway: Send + Sync {
    fn send_sms(&self, to: &str, text: &str) -> Result<(), TelephonyError>;
}

/// Efeitos colaterais de início/fim de chamada (eventos para a UI).
pub trait CallObserver: Send + Sync {
    fn call_started(&self, phone: &str);
    fn call_finished(&self, phone: &str);
}

/// Garante `call_finished` uma única vez, mesmo com panic no worker.
struct FinishGuard {
    observer: Arc<dyn CallObserver>,
    phone: String,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.observer.call_finished(&self.phone);
    }
}

// ──────────────────────────────────────────────
// Dispatcher
// ──────────────────────────────────────────────

#[derive(Clone)]
pub struct CallDispatcher {
    supervisor: Supervisor,
    telephony: Arc<dyn Telephony>,
    sms: Arc<dyn SmsGateway>,
    observer: Arc<dyn CallObserver>,
    calls: CallConfig,
    sms_enabled: bool,
}

impl CallDispatcher {
    pub fn new(
        supervisor: Supervisor,
        telephony: Arc<dyn Telephony>,
        sms: Arc<dyn SmsGateway>,
        observer: Arc<dyn CallObserver>,
        calls: &CallConfig,
        sms_config: &SmsConfig,
    ) -> Self {
        Self {
            supervisor,
            telephony,
            sms,
            observer,
            calls: calls.clone(),
            sms_enabled: sms_config.send_sms,
        }
    }

    /// Inicia a chamada para `phone`. Retorna `false` se as chamadas estão
    /// desativadas ou se já há uma chamada em curso para o número.
    pub fn make_call(&self, phone: &str) -> bool {
        if !self.calls.make_calls {
            info!("Chamadas desativadas, ignorando chamada para {phone}");
            return false;
        }

        let name = call_worker_name(phone);
        if self.supervisor.any_live_by_name(&name) {
            info!("Chamada para {phone} já em curso");
            return false;
        }

        self.observer.call_started(phone);
        let dispatcher = self.clone();
        let target = phone.to_string();
        let started = self.supervisor.start(
            WorkerSpec::new(name, move |ctx| {
                let _finish = FinishGuard {
                    observer: Arc::clone(&dispatcher.observer),
                    phone: target.clone(),
                };
                let reached = dispatcher.dial(ctx, &target);
                info!("Chamada para {target} encerrada, atendida: {reached}");
                Ok(())
            })
            .exclusive(),
        );

        if started.is_none() {
            // outra thread iniciou a mesma chamada entre a checagem e o start
            self.observer.call_finished(phone);
            return false;
        }
        true
    }

    /// Loop de discagem; `true` se a chamada foi atendida ou cancelada.
    fn dial(&self, ctx: &WorkerContext, phone: &str) -> bool {
        for attempt in 1..=self.calls.max_attempts {
            if ctx.is_cancelled() {
                return true;
            }
            info!("Chamando {phone}, tentativa {attempt}/{}", self.calls.max_attempts);
            match self.attempt(ctx, phone) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    warn!("Tentativa {attempt} para {phone} falhou: {e}");
                    std::thread::sleep(self.calls.poll_interval());
                }
            }
        }
        warn!("Tentativas esgotadas para {phone}");
        false
    }

    fn attempt(&self, ctx: &WorkerContext, phone: &str) -> Result<bool, TelephonyError> {
        let call_id = self.telephony.place_call(phone)?;
        loop {
            std::thread::sleep(self.calls.poll_interval());

            if ctx.is_cancelled() {
                info!("Chamada {call_id} cancelada");
                self.telephony.complete_call(&call_id)?;
                return Ok(true);
            }

            let status = self.telephony.call_status(&call_id)?;
            if status.is_reached() {
                return Ok(true);
            }
            if status.is_failure() {
                info!("Chamada {call_id} para {phone}: {status:?}");
                return Ok(false);
            }
        }
    }

    /// Sinaliza o cancelamento da chamada em curso para `phone`.
    pub fn cancel(&self, phone: &str) -> bool {
        match self.supervisor.get_by_name(&call_worker_name(phone)) {
            Some(worker) => {
                worker.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Números com chamada em curso.
    pub fn calls_in_progress(&self) -> Vec<String> {
        self.supervisor
            .live_names_with_prefix(CALL_WORKER_PREFIX)
            .into_iter()
            .filter_map(|name| name.strip_prefix(CALL_WORKER_PREFIX).map(str::to_string))
            .collect()
    }

    /// Envia um SMS em um worker (uma tentativa, sem repetição).
    pub fn send_sms(&self, to: &str, text: &str) {
        if !self.sms_enabled {
            info!("SMS desativado, ignorando envio para {to}");
            return;
        }
        let gateway = Arc::clone(&self.sms);
        let (to, text) = (to.to_string(), text.to_string());
        self.supervisor
            .start(WorkerSpec::new(format!("Sending SMS to {to}"), move |_| {
                gateway.send_sms(&to, &text)?;
                info!("SMS enviado para {to}");
                Ok(())
            }));
    }
}
