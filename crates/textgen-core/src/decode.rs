use textgen_backend::{Tokenizer, SPACE_MARKER};
use textgen_common::{GenerationState, Result};

/// Tokenizes `prompt`, optionally dropping a leading BOS and keeping only the
/// last `truncation_length` tokens.
pub fn encode(
    tokenizer: &dyn Tokenizer,
    prompt: &str,
    add_special_tokens: bool,
    add_bos_token: bool,
    truncation_length: Option<usize>,
) -> Result<Vec<u32>> {
    let mut ids = tokenizer.encode(prompt, add_special_tokens)?;
    if !add_bos_token && tokenizer.bos_token_id().is_some_and(|bos| ids.first() == Some(&bos)) {
        ids.remove(0);
    }
    if let Some(keep) = truncation_length.filter(|&n| n > 0) {
        if ids.len() > keep {
            ids.drain(..ids.len() - keep);
        }
    }
    Ok(ids)
}

pub fn decode(tokenizer: &dyn Tokenizer, output_ids: &[u32], skip_special_tokens: bool) -> Result<String> {
    tokenizer.decode(output_ids, skip_special_tokens)
}

/// Room left for the prompt once `max_new_tokens` is reserved.
pub fn get_max_prompt_length(state: &GenerationState) -> Option<usize> {
    state.truncation_length().map(|t| t.saturating_sub(state.max_new_tokens()))
}

/// One line per token: the id padded to five columns and the decoded piece.
pub fn get_token_ids(tokenizer: &dyn Tokenizer, prompt: &str) -> Result<String> {
    let ids = encode(tokenizer, prompt, true, true, None)?;
    let mut out = String::new();
    for id in ids {
        let piece = tokenizer.decode(&[id], false)?;
        out.push_str(&format!("{:<5}  -  {:?}\n", id, piece));
    }
    Ok(out)
}

/// Decodes the part of `output_ids` produced after the prompt.
///
/// Returns the text and the number of new tokens. Seq2seq models return only
/// new tokens, so the whole output counts.
pub fn reply_from_output_ids(
    tokenizer: &dyn Tokenizer,
    output_ids: &[u32],
    input_len: usize,
    is_seq2seq: bool,
    skip_special_tokens: bool,
) -> Result<(String, usize)> {
    let new_ids = if is_seq2seq { output_ids } else { output_ids.get(input_len..).unwrap_or(&[]) };
    let mut reply = tokenizer.decode(new_ids, skip_special_tokens)?;
    if !is_seq2seq && tokenizer.strips_leading_space() {
        let marked = new_ids
            .first()
            .and_then(|&id| tokenizer.id_to_token(id))
            .is_some_and(|piece| piece.starts_with(SPACE_MARKER));
        if marked {
            reply.insert(0, ' ');
        }
    }
    Ok((reply, new_ids.len()))
}
