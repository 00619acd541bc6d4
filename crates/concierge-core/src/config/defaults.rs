//! Default values for every `#[serde(default = "...")]` field.

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_name() -> String {
    "Concierge".to_string()
}

pub(super) fn default_data_dir() -> String {
    "~/.concierge".to_string()
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_country_code() -> String {
    "56".to_string()
}

pub(super) fn default_local_length() -> usize {
    9
}

pub(super) fn default_db_path() -> String {
    "~/.concierge/data/concierge.db".to_string()
}

pub(super) fn default_bridge_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

pub(super) fn default_whisper_url() -> String {
    "https://api.openai.com/v1".to_string()
}

pub(super) fn default_whisper_model() -> String {
    "whisper-1".to_string()
}

pub(super) fn default_provider_url() -> String {
    "https://api.openai.com/v1".to_string()
}

pub(super) fn default_provider_model() -> String {
    "gpt-4o-mini".to_string()
}

pub(super) fn default_system_prompt() -> String {
    "Eres el asistente de atención de la tienda. Responde en español, \
     de forma breve y amable."
        .to_string()
}

pub(super) fn default_fallback_reply() -> String {
    "Gracias por tu mensaje. En breve te responderemos.".to_string()
}

pub(super) fn default_wait_ms() -> u64 {
    2_500
}

pub(super) fn default_max_wait_ms() -> u64 {
    10_000
}

pub(super) fn default_trigger_phrases() -> Vec<String> {
    [
        "hablar con un agente",
        "hablar con una persona",
        "hablar con un humano",
        "agente humano",
        "ejecutivo",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub(super) fn default_pause_minutes() -> i64 {
    30
}

pub(super) fn default_ack_message() -> String {
    "Te comunicaremos con una persona de nuestro equipo. \
     Te responderemos a la brevedad."
        .to_string()
}

pub(super) fn default_admin_template() -> String {
    "Solicitud de atención humana de {phone}: \"{message}\"".to_string()
}

pub(super) fn default_survey_keyword() -> String {
    "encuesta".to_string()
}

pub(super) fn default_welcome_message() -> String {
    "¡Gracias por participar en nuestra encuesta!".to_string()
}

pub(super) fn default_thank_you_message() -> String {
    "¡Gracias por tus respuestas! Las tendremos en cuenta.".to_string()
}

pub(super) fn default_poll_interval() -> u64 {
    60
}

pub(super) fn default_active_start_hour() -> u32 {
    6
}

pub(super) fn default_active_end_hour() -> u32 {
    22
}

pub(super) fn default_max_daily_messages() -> u32 {
    200
}

pub(super) fn default_min_delay_ms() -> u64 {
    5_000
}

pub(super) fn default_max_delay_ms() -> u64 {
    15_000
}

pub(super) fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

pub(super) fn default_api_port() -> u16 {
    3080
}
