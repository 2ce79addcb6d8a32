/// Open/closed state for a group of dropdowns where at most one is open.
#[derive(Debug, Clone)]
pub struct DropdownSet<K> {
    ids: Vec<K>,
    open: Option<K>,
}

impl<K: Copy + Eq> DropdownSet<K> {
    pub fn new(ids: impl IntoIterator<Item = K>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            open: None,
        }
    }

    /// Close everything, then reopen `id` unless it was the one already open.
    /// Unknown ids only close the others.
    pub fn toggle(&mut self, id: K) {
        let was_open = self.is_open(id);
        self.close_all();
        if !was_open && self.ids.contains(&id) {
            self.open = Some(id);
        }
    }

    /// A click that landed outside every dropdown
    pub fn click_outside(&mut self) {
        self.close_all();
    }

    pub fn close(&mut self, id: K) {
        if self.open == Some(id) {
            self.open = None;
        }
    }

    pub fn close_all(&mut self) {
        self.open = None;
    }

    pub fn is_open(&self, id: K) -> bool {
        self.open == Some(id)
    }

    pub fn open_dropdown(&self) -> Option<K> {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Menu {
        Indicator,
        Type,
        Option,
    }

    fn menus() -> DropdownSet<Menu> {
        DropdownSet::new([Menu::Indicator, Menu::Type, Menu::Option])
    }

    #[test]
    fn test_toggle_twice_closes() {
        let mut set = menus();
        set.toggle(Menu::Type);
        assert!(set.is_open(Menu::Type));
        set.toggle(Menu::Type);
        assert!(!set.is_open(Menu::Type));
        assert_eq!(set.open_dropdown(), None);
    }

    #[test]
    fn test_opening_one_closes_the_other() {
        let mut set = menus();
        set.toggle(Menu::Indicator);
        set.toggle(Menu::Option);
        assert!(!set.is_open(Menu::Indicator));
        assert!(set.is_open(Menu::Option));
    }

    #[test]
    fn test_click_outside_closes_all() {
        let mut set = menus();
        set.toggle(Menu::Indicator);
        set.click_outside();
        assert_eq!(set.open_dropdown(), None);

        // idempotent with nothing open
        set.click_outside();
        assert_eq!(set.open_dropdown(), None);
    }

    #[test]
    fn test_close_only_affects_named_dropdown() {
        let mut set = menus();
        set.toggle(Menu::Type);
        set.close(Menu::Option);
        assert!(set.is_open(Menu::Type));
        set.close(Menu::Type);
        assert_eq!(set.open_dropdown(), None);
    }
}
