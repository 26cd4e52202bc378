use crate::models::Status;

const MIN_CONFIDENT_CHARS: usize = 400;

/// Phrases that mark a listing as taken down.
const REMOVAL_HINTS: &[&str] = &[
    "vaga encerrada",
    "oportunidade encerrada",
    "inscrições encerradas",
    "não está mais disponível",
    "nao esta mais disponivel",
    "job is no longer available",
    "position is no longer available",
    "position closed",
    "erro 404",
    "error 404",
    "página não encontrada",
    "pagina nao encontrada",
];

/// Status guess from raw page text, used as the default the model may override.
pub fn classify(text: &str) -> Status {
    let lower = text.to_lowercase();
    if REMOVAL_HINTS.iter().any(|hint| lower.contains(hint)) {
        return Status::Removida;
    }
    if lower.trim().chars().count() < MIN_CONFIDENT_CHARS {
        return Status::Duvidosa;
    }
    Status::Ativa
}
