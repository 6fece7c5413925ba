use encoding8::ascii;

/// Dumps a byte slice the way `dig +short` dumps raw wire bytes. Used by
/// the `-v` / `-vv` logging levels to show a query or response alongside
/// its decoded form.
pub fn hexdump(slice: &[u8]) -> String {
    const WIDTH: usize = 16;
    let mut out = String::new();
    let mut offset = 0;

    for row in slice.chunks(WIDTH) {
        let row_hex: String = row.iter().map(|x| format!("{:02X} ", x)).collect();

        let row_str: String = row
            .iter()
            .map(|x| if ascii::is_printable(*x) { *x as char } else { '.' })
            .collect();

        out.push_str(&format!("{:>08x}: {:<48} {}\n", offset, row_hex, row_str));
        offset += WIDTH;
    }

    out
}
