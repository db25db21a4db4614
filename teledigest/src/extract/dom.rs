//! Minimal element-tree view the extraction policies are written against.
//!
//! Selection code only needs tag names, classes, attributes, child elements and text, so it
//! takes any [`DomElement`] rather than a concrete parser type. The `scraper` implementation
//! lives at the bottom of this file.

use scraper::{ElementRef, Node};

pub trait DomElement: Copy {
    fn tag_name(&self) -> &str;
    fn has_class(&self, class: &str) -> bool;
    fn attr(&self, name: &str) -> Option<&str>;
    /// Direct element children in document order.
    fn child_elements(&self) -> Vec<Self>;
    /// Concatenated descendant text; `<br>` contributes a newline.
    fn text_content(&self) -> String;

    fn has_classes(&self, classes: &[&str]) -> bool {
        classes.iter().all(|c| self.has_class(c))
    }
}

/// All descendants of `root` (root excluded) matching `pred`, in document order.
pub fn find_all<E, P>(root: E, pred: P) -> Vec<E>
where
    E: DomElement,
    P: Fn(&E) -> bool,
{
    let mut found = Vec::new();
    for child in root.child_elements() {
        walk(child, &|_: &E| false, &mut |el: E| {
            if pred(&el) {
                found.push(el);
            }
        });
    }
    found
}

/// First descendant of `root` (root excluded) matching `pred`.
pub fn find_first<E, P>(root: E, pred: P) -> Option<E>
where
    E: DomElement,
    P: Fn(&E) -> bool,
{
    find_all(root, pred).into_iter().next()
}

/// Pre-order walk over `root` and its descendants. Elements for which `prune` returns true
/// are skipped together with their whole subtree.
pub fn walk<E, X, V>(root: E, prune: &X, visit: &mut V)
where
    E: DomElement,
    X: Fn(&E) -> bool,
    V: FnMut(E),
{
    let mut stack = vec![root];
    while let Some(el) = stack.pop() {
        if prune(&el) {
            continue;
        }
        visit(el);
        let mut children = el.child_elements();
        children.reverse();
        stack.extend(children);
    }
}

impl<'a> DomElement for ElementRef<'a> {
    fn tag_name(&self) -> &str {
        self.value().name()
    }

    fn has_class(&self, class: &str) -> bool {
        self.value().classes().any(|c| c == class)
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.value().attr(name)
    }

    fn child_elements(&self) -> Vec<Self> {
        self.children().filter_map(ElementRef::wrap).collect()
    }

    fn text_content(&self) -> String {
        let mut out = String::new();
        for node in self.descendants() {
            match node.value() {
                Node::Text(text) => out.push_str(text),
                Node::Element(el) if el.name() == "br" => out.push('\n'),
                _ => {}
            }
        }
        out
    }
}
