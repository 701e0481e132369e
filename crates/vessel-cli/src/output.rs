//! Formatted output helpers for CLI commands.

use vessel_net::network::Network;

/// Renders rows as left-aligned columns separated by two spaces, each
/// column as wide as its widest cell.
#[must_use]
pub fn table<const N: usize>(headers: [&str; N], rows: &[[String; N]]) -> String {
    let mut widths = headers.map(str::len);
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    push_row(&mut out, headers.into_iter(), &widths);
    for row in rows {
        push_row(&mut out, row.iter().map(String::as_str), &widths);
    }
    out
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let line = cells
        .zip(widths.iter().copied())
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str(line.trim_end());
    out.push('\n');
}

/// Table of networks with their subnet, gateway, and driver.
#[must_use]
pub fn network_table(networks: &[Network]) -> String {
    let rows: Vec<[String; 4]> = networks
        .iter()
        .map(|n| {
            [
                n.name.clone(),
                n.cidr(),
                n.gateway().to_string(),
                n.driver.clone(),
            ]
        })
        .collect();
    table(["NAME", "SUBNET", "GATEWAY", "DRIVER"], &rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_align_to_the_widest_cell() {
        let out = table(
            ["A", "B"],
            &[
                ["long-value".to_owned(), "x".to_owned()],
                ["s".to_owned(), "y".to_owned()],
            ],
        );
        assert_eq!(out, "A           B\nlong-value  x\ns           y\n");
    }

    #[test]
    fn empty_table_has_only_headers() {
        assert_eq!(network_table(&[]), "NAME  SUBNET  GATEWAY  DRIVER\n");
    }

    #[test]
    fn network_rows_show_subnet_and_gateway() {
        let net = Network {
            name: "testbridge".into(),
            ip_range: "192.168.100.1/24".parse().unwrap(),
            driver: "bridge".into(),
        };
        let out = network_table(&[net]);
        let row = out.lines().nth(1).unwrap();
        assert_eq!(row, "testbridge  192.168.100.0/24  192.168.100.1  bridge");
    }
}
