//! Fift hex text form of cell trees
//!
//! Every cell is one line `<indent>x{<hex>[_]}`; children follow their parent
//! indented one level deeper.
//!
//! ```text
//! x{C8}
//!  x{62_}
//!   x{6E_}
//! ```

use crate::tvm::bits;
use crate::tvm::cell::Cell;
use crate::tvm::error::{Result, format_err};
use std::sync::Arc;

/// Renders a cell tree, children indented by one space per level
pub fn print(root: &Cell) -> String {
    let mut output = String::new();
    let mut stack: Vec<(&Cell, usize)> = vec![(root, 0)];

    while let Some((cell, indent)) = stack.pop() {
        output.extend(std::iter::repeat_n(' ', indent));
        output.push_str("x{");
        output.push_str(&bits::to_fift_hex(cell.data(), cell.bit_len()));
        output.push_str("}\n");

        for reference in cell.references().iter().rev() {
            stack.push((reference, indent + 1));
        }
    }

    output
}

struct OpenCell {
    indent: usize,
    data: Vec<u8>,
    bit_len: usize,
    children: Vec<Arc<Cell>>,
}

impl OpenCell {
    fn close(self) -> Result<Arc<Cell>> {
        Ok(Arc::new(Cell::with_references(
            self.data,
            self.bit_len,
            self.children,
            false,
        )?))
    }
}

/// Parses Fift hex text into its top-level cells
///
/// A line becomes a child of the nearest preceding line with a smaller indent.
/// Subtrees are frozen as soon as a line with the same or smaller indent closes them.
pub fn parse(text: &str) -> Result<Vec<Arc<Cell>>> {
    let mut roots = Vec::new();
    let mut open: Vec<OpenCell> = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let body = line.trim();
        if body.is_empty() {
            continue;
        }

        let indent = line.len() - line.trim_start().len();
        let hex = body
            .strip_prefix("x{")
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| format_err!("Bad Fift hex on line {}: '{}'", line_no + 1, body))?;
        let (data, bit_len) = bits::from_fift_hex(hex)?;

        while open.last().is_some_and(|top| top.indent >= indent) {
            close_top(&mut open, &mut roots)?;
        }

        open.push(OpenCell {
            indent,
            data,
            bit_len,
            children: Vec::new(),
        });
    }

    while !open.is_empty() {
        close_top(&mut open, &mut roots)?;
    }

    if roots.is_empty() {
        return Err(format_err!("Empty Fift hex"));
    }

    log::trace!("Parsed {} root cell(s) from Fift hex", roots.len());
    Ok(roots)
}

fn close_top(open: &mut Vec<OpenCell>, roots: &mut Vec<Arc<Cell>>) -> Result<()> {
    if let Some(top) = open.pop() {
        let cell = top.close()?;
        match open.last_mut() {
            Some(parent) => parent.children.push(cell),
            None => roots.push(cell),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tvm::error::CellError;

    const FIFT_TREE: &str =
        "x{C8}\n x{62_}\n  x{6E_}\n   x{500A9}\n   x{400AA}\n  x{A08090C_}\n x{BEFDF21}";

    #[test]
    fn test_parse_known_tree() {
        let roots = parse(FIFT_TREE).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(
            roots[0].hash_hex(),
            "92f18ee3a6c7082d33a25b704a7e9fa06200d9541517c450733d1b8eb4d3dce4"
        );
        assert_eq!(roots[0].reference_count(), 2);
        assert_eq!(roots[0].reference(0).unwrap().bit_len(), 6);
    }

    #[test]
    fn test_print_parse_roundtrip() {
        let root = parse(FIFT_TREE).unwrap().remove(0);
        let printed = print(&root);
        assert_eq!(printed.trim_end(), FIFT_TREE);

        let reparsed = parse(&printed).unwrap();
        assert_eq!(reparsed[0].hash(), root.hash());
    }

    #[test]
    fn test_multiple_roots() {
        let roots = parse("x{AB}\n x{CD}\nx{EF}").unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].reference_count(), 1);
        assert_eq!(roots[1].reference_count(), 0);
    }

    #[test]
    fn test_bad_input() {
        assert!(matches!(parse(""), Err(CellError::Format(_))));
        assert!(matches!(parse("y{00}"), Err(CellError::Format(_))));
        assert!(matches!(
            parse("x{}\n x{}\n x{}\n x{}\n x{}\n x{}"),
            Err(CellError::Capacity(_))
        ));
    }
}
