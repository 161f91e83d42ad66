const ROW: usize = 16;

/// Classic 16-bytes-per-row hex dump with an ASCII column.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4 + data.len() / ROW * 4);
    for row in data.chunks(ROW) {
        let hex: String = row.iter().map(|byte| format!("{byte:02x} ")).collect();
        let text: String = row
            .iter()
            .map(|&byte| {
                if (32..127).contains(&byte) {
                    byte as char
                } else {
                    '.'
                }
            })
            .collect();
        out.push_str(&format!("{hex:<width$}| {text}\n", width = ROW * 3));
    }
    out
}
