//! Post-processing of completion responses.

use serde_json::Value;

/// Extend the edit range of directive completions by one character.
///
/// The server's directive items stop one character short of the text
/// they replace, so accepting such an item leaves a stray character
/// behind. Handles both the array and the `CompletionList` form.
pub fn patch_directive_completions(result: &mut Value) -> usize {
    let items = match result {
        Value::Array(items) => items,
        Value::Object(list) => match list.get_mut("items") {
            Some(Value::Array(items)) => items,
            _ => return 0,
        },
        _ => return 0,
    };

    let mut patched = 0;
    for item in items.iter_mut() {
        if item.get("detail").and_then(Value::as_str) != Some("directive") {
            continue;
        }
        let Some(character) = item.pointer_mut("/textEdit/range/end/character") else {
            continue;
        };
        if let Some(n) = character.as_u64() {
            *character = Value::from(n + 1);
            patched += 1;
        }
    }
    patched
}
