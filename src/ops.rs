use std::collections::HashMap;

/// Table of installed binary operators and their precedences. Entries are
/// always positive; `'='` `'<'` `'+'` `'-'` `'*'` are preloaded and
/// user-defined operators are installed while their definition is lowered.
pub(crate) struct BinopPrecedence(HashMap<char, i32>);

impl Default for BinopPrecedence {
    fn default() -> Self {
        let mut table = HashMap::new();
        table.insert('=', 2);
        table.insert('<', 10);
        table.insert('+', 20);
        table.insert('-', 20);
        table.insert('*', 40);
        BinopPrecedence(table)
    }
}

impl BinopPrecedence {
    /// Precedence of `op`, or -1 when `op` is not a binary operator.
    pub(crate) fn precedence(&self, op: char) -> i32 {
        self.0.get(&op).copied().unwrap_or(-1)
    }

    pub(crate) fn install(&mut self, op: char, prec: i32) {
        debug_assert!(prec > 0);
        self.0.insert(op, prec);
    }

    pub(crate) fn remove(&mut self, op: char) {
        self.0.remove(&op);
    }
}
