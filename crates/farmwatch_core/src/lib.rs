//! # FarmWatch Core
//!
//! Runtime de monitoramento: escuta sensores pelo rádio serial, detecta
//! condições fora dos limites, escala avisos (SMS, e-mail, chamada) e
//! aciona relés por uma segunda porta serial. Todo trabalho assíncrono
//! roda em workers supervisionados.
//!
//! ## Módulos
//! - [`supervisor`] – Workers nomeados, únicos por nome, com reinício
//! - [`protocol`] – Frames de telemetria estilo LLAP
//! - [`listener`] – Escuta do rádio e sensores simulados
//! - [`alerts`] – Janela deslizante por sensor (K de N, cooldown)
//! - [`relay`] – Protocolo serial da placa de relés
//! - [`callcenter`] – SMS e chamadas com cancelamento
//! - [`escalation`] – Notificações e envio aos contatos
//! - [`store`] – Sensores, contatos, relés e notificações em memória
//! - [`archive`] – Séries temporais das leituras
//! - [`events`] – Eventos para a UI e comandos da UI
//! - [`controller`] – Pipeline que liga tudo
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod supervisor;
pub mod listener;
pub mod alerts;
pub mod relay;
pub mod callcenter;
pub mod escalation;
pub mod store;
pub mod archive;
pub mod events;
pub mod controller;
pub mod config;

// Re-exports convenientes
pub use config::AppConfig;
pub use controller::{Collaborators, Controller};
pub use events::{EventSink, UiCommand, UiEvent};
pub use supervisor::Supervisor;
pub use types::Reading;
