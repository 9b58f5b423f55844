//! Cliente REST da Twilio para chamadas e SMS.
//!
//! As chamadas tocam um TwiML fixo: o que importa é o telefone tocar, não
//! o conteúdo. SMS pode usar outra conta (`sms_*` na configuração).

use farmwatch_core::callcenter::{CallStatus, SmsGateway, Telephony, TelephonyError};
use farmwatch_core::config::TwilioConfig;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
struct Account {
    sid: String,
    token: String,
    from: String,
}

impl Account {
    fn is_configured(&self) -> bool {
        !self.sid.is_empty() && !self.token.is_empty() && !self.from.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
    status: CallStatus,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

pub struct TwilioClient {
    http: Client,
    api_base: String,
    voice: Account,
    sms: Account,
    twiml_url: String,
}

impl TwilioClient {
    pub fn new(config: &TwilioConfig) -> Result<Self, TelephonyError> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| TelephonyError::Http(e.to_string()))?;

        let voice = Account {
            sid: config.account_sid.clone(),
            token: config.auth_token.clone(),
            from: config.from_phone.clone(),
        };
        // Sem conta própria, o SMS usa a conta de voz
        let sms = if config.sms_account_sid.is_empty() {
            voice.clone()
        } else {
            Account {
                sid: config.sms_account_sid.clone(),
                token: config.sms_auth_token.clone(),
                from: config.sms_from_phone.clone(),
            }
        };

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            voice,
            sms,
            twiml_url: config.call_twiml_url.clone(),
        })
    }

    fn url(&self, account: &Account, resource: &str) -> String {
        format!("{}/Accounts/{}/{resource}", self.api_base, account.sid)
    }

    fn voice_account(&self) -> Result<&Account, TelephonyError> {
        if self.voice.is_configured() {
            Ok(&self.voice)
        } else {
            Err(TelephonyError::Disabled("conta de voz da Twilio não configurada"))
        }
    }

    fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, TelephonyError> {
        let response = request.send().map_err(|e| TelephonyError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .map(|b| b.message)
                .unwrap_or_else(|_| status.to_string());
            return Err(TelephonyError::Api {
                status: status.as_u16(),
                message,
            });
        }
        response.json().map_err(|e| TelephonyError::Http(e.to_string()))
    }
}

impl Telephony for TwilioClient {
    fn place_call(&self, to: &str) -> Result<String, TelephonyError> {
        let account = self.voice_account()?;
        let request = self
            .http
            .post(self.url(account, "Calls.json"))
            .basic_auth(&account.sid, Some(&account.token))
            .form(&[("To", to), ("From", account.from.as_str()), ("Url", self.twiml_url.as_str())]);
        let call: CallResource = Self::execute(request)?;
        info!("Chamada {} para {to} criada ({:?})", call.sid, call.status);
        Ok(call.sid)
    }

    fn call_status(&self, call_id: &str) -> Result<CallStatus, TelephonyError> {
        let account = self.voice_account()?;
        let request = self
            .http
            .get(self.url(account, &format!("Calls/{call_id}.json")))
            .basic_auth(&account.sid, Some(&account.token));
        let call: CallResource = Self::execute(request)?;
        debug!("Chamada {call_id}: {:?}", call.status);
        Ok(call.status)
    }

    fn complete_call(&self, call_id: &str) -> Result<(), TelephonyError> {
        let account = self.voice_account()?;
        let request = self
            .http
            .post(self.url(account, &format!("Calls/{call_id}.json")))
            .basic_auth(&account.sid, Some(&account.token))
            .form(&[("Status", "completed")]);
        let _: CallResource = Self::execute(request)?;
        Ok(())
    }
}

impl SmsGateway for TwilioClient {
    fn send_sms(&self, to: &str, text: &str) -> Result<(), TelephonyError> {
        if !self.sms.is_configured() {
            return Err(TelephonyError::Disabled("conta de SMS da Twilio não configurada"));
        }
        let request = self
            .http
            .post(self.url(&self.sms, "Messages.json"))
            .basic_auth(&self.sms.sid, Some(&self.sms.token))
            .form(&[("To", to), ("From", self.sms.from.as_str()), ("Body", text)]);
        let _: serde_json::Value = Self::execute(request)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sms_falls_back_to_voice_account() {
        let config = TwilioConfig {
            account_sid: "AC1".into(),
            auth_token: "tok".into(),
            from_phone: "+1500".into(),
            ..Default::default()
        };
        let client = TwilioClient::new(&config).unwrap();
        assert_eq!(client.sms.sid, "AC1");
        assert_eq!(
            client.url(&client.voice, "Calls.json"),
            "https://api.twilio.com/2010-04-01/Accounts/AC1/Calls.json"
        );
    }

    #[test]
    fn unconfigured_account_is_disabled() {
        let client = TwilioClient::new(&TwilioConfig::default()).unwrap();
        assert!(matches!(client.place_call("+100"), Err(TelephonyError::Disabled(_))));
        assert!(matches!(client.send_sms("+100", "oi"), Err(TelephonyError::Disabled(_))));
    }

    #[test]
    fn call_resource_parses_status() {
        let call: CallResource =
            serde_json::from_str(r#"{"sid":"CA1","status":"no-answer","to":"+100"}"#).unwrap();
        assert_eq!(call.status, CallStatus::NoAnswer);
    }
}
